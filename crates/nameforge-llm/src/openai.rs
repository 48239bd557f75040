use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::http::{build_client, send_json};
use crate::parse::parse_items;
use crate::{AdapterOutput, CallRequest, ModelInfo, ProviderAdapter};
use nameforge_types::{NameforgeError, Result};

pub const DEFAULT_SYSTEM_PROMPT: &str = "你是一个专业的姓名生成专家。";
const DEFAULT_TOP_P: f64 = 0.9;

// ---------------------------------------------------------------------------
// OpenAiCompatAdapter
// ---------------------------------------------------------------------------

/// Chat-completions adapter for every backend that speaks the OpenAI wire
/// format (OpenAI itself, SiliconFlow, DashScope compatible mode, Qianfan v2, ...).
#[derive(Debug)]
pub struct OpenAiCompatAdapter {
    name: String,
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
    max_tokens: u32,
    temperature: f64,
    timeout: Duration,
    streaming: bool,
    system_prompt: String,
}

impl OpenAiCompatAdapter {
    /// Validates `config` and builds the HTTP client with its timeout.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: config.name.clone(),
            api_key: config.api_key.clone().unwrap_or_default(),
            client: build_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout(),
            streaming: config.stream,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request_body(&self, request: &CallRequest) -> Value {
        let opts = &request.options;
        let mut body = json!({
            "model": opts.model.as_deref().unwrap_or(&self.default_model),
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": request.prompt },
            ],
            "max_tokens": opts.max_tokens.unwrap_or(self.max_tokens),
            "temperature": opts.temperature.unwrap_or(self.temperature),
            "top_p": DEFAULT_TOP_P,
            "stream": false,
        });

        // Pass-through knobs (top_p, presence_penalty, ...) override the defaults.
        for (key, value) in &opts.extra {
            body[key.as_str()] = value.clone();
        }
        body
    }

    fn parse_response(&self, body: Value) -> Result<AdapterOutput> {
        let text = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| NameforgeError::MalformedResponse {
                provider: self.name.clone(),
                message: "response has no choices[0].message.content".into(),
            })?;
        let model = body["model"]
            .as_str()
            .unwrap_or(&self.default_model)
            .to_string();

        Ok(AdapterOutput {
            items: parse_items(text, &self.name),
            provider: self.name.clone(),
            model,
            raw_text: text.to_string(),
        })
    }

    fn parse_models(&self, body: &Value) -> Vec<ModelInfo> {
        body["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["id"].as_str())
                    .map(|id| ModelInfo {
                        id: id.to_string(),
                        provider: self.name.clone(),
                        is_default: id == self.default_model,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    async fn call(&self, request: &CallRequest) -> Result<AdapterOutput> {
        let body = self.build_request_body(request);
        let http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);

        let json = send_json(&self.name, self.timeout, http).await?;
        self.parse_response(json)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let http = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key);
        let json = send_json(&self.name, self.timeout, http).await?;
        Ok(self.parse_models(&json))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use crate::GenerationOptions;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> ProviderConfig {
        ProviderConfig::new(
            "siliconflow",
            Protocol::OpenAiCompatible,
            "https://api.siliconflow.cn/v1/",
            "Qwen/Qwen2.5-7B-Instruct",
        )
        .with_api_key("sk-test")
    }

    fn adapter() -> OpenAiCompatAdapter {
        OpenAiCompatAdapter::from_config(&config()).unwrap()
    }

    #[test]
    fn from_config_requires_key() {
        let cfg = ProviderConfig {
            api_key: None,
            ..config()
        };
        let err = OpenAiCompatAdapter::from_config(&cfg).unwrap_err();
        assert!(matches!(err, NameforgeError::ConfigurationError { .. }));
    }

    #[test]
    fn from_config_trims_trailing_slash() {
        assert_eq!(adapter().base_url(), "https://api.siliconflow.cn/v1");
    }

    #[test]
    fn request_body_uses_config_defaults() {
        let body = adapter().build_request_body(&CallRequest::new("给战士起名", 5));
        assert_eq!(body["model"], "Qwen/Qwen2.5-7B-Instruct");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], DEFAULT_SYSTEM_PROMPT);
        assert_eq!(body["messages"][1]["content"], "给战士起名");
        assert_eq!(body["max_tokens"], 2000);
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["top_p"], 0.9);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn request_body_applies_options() {
        let opts = GenerationOptions::default()
            .with_model("Qwen/Qwen3-8B")
            .with_max_tokens(100)
            .with_temperature(1.1)
            .with_extra("top_p", json!(0.8));
        let body = adapter().build_request_body(&CallRequest::new("x", 1).with_options(opts));
        assert_eq!(body["model"], "Qwen/Qwen3-8B");
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["temperature"], 1.1);
        assert_eq!(body["top_p"], 0.8);
    }

    #[test]
    fn parse_response_extracts_items() {
        let out = adapter()
            .parse_response(json!({
                "model": "Qwen/Qwen2.5-7B-Instruct",
                "choices": [{ "message": { "role": "assistant",
                    "content": "1. 林晚：傍晚林间\n2. 苏映雪 - 纯净如雪" } }]
            }))
            .unwrap();
        assert_eq!(out.provider, "siliconflow");
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.items[1].content, "苏映雪");
        assert_eq!(out.items[1].source, "siliconflow");
        assert!(out.raw_text.starts_with("1. 林晚"));
    }

    #[test]
    fn parse_response_without_choices_is_malformed() {
        let err = adapter().parse_response(json!({ "choices": [] })).unwrap_err();
        assert!(matches!(err, NameforgeError::MalformedResponse { .. }));
        assert_eq!(err.kind(), nameforge_types::FailureKind::Unexpected);
    }

    #[test]
    fn parse_models_marks_default() {
        let models = adapter().parse_models(&json!({
            "data": [{ "id": "Qwen/Qwen2.5-7B-Instruct" }, { "id": "deepseek-ai/DeepSeek-V3" }]
        }));
        assert_eq!(models.len(), 2);
        assert!(models[0].is_default);
        assert!(!models[1].is_default);
    }

    #[tokio::test]
    async fn call_posts_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "m1",
                "choices": [{ "message": { "content": "张勇：勇敢坚强" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter().with_base_url(server.uri());
        let out = adapter.call(&CallRequest::new("warrior", 1)).await.unwrap();
        assert_eq!(out.model, "m1");
        assert_eq!(out.items[0].content, "张勇");

        let requests = server.received_requests().await.unwrap();
        let body: Value = requests[0].body_json().unwrap();
        assert_eq!(body["model"], "Qwen/Qwen2.5-7B-Instruct");
        assert_eq!(body["messages"][1]["content"], "warrior");
        assert_eq!(body["stream"], false);
    }

    #[tokio::test]
    async fn call_maps_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({ "error": { "message": "bad key" } })),
            )
            .mount(&server)
            .await;

        let err = adapter()
            .with_base_url(server.uri())
            .call(&CallRequest::new("x", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, NameforgeError::AuthError { .. }));
    }

    #[tokio::test]
    async fn list_models_reads_model_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "id": "Qwen/Qwen2.5-7B-Instruct" }, { "id": "Qwen/Qwen3-8B" }]
            })))
            .mount(&server)
            .await;

        let models = adapter().with_base_url(server.uri()).list_models().await.unwrap();
        let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["Qwen/Qwen2.5-7B-Instruct", "Qwen/Qwen3-8B"]);
    }
}
