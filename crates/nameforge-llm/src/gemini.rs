use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::http::{build_client, send_json};
use crate::openai::DEFAULT_SYSTEM_PROMPT;
use crate::parse::parse_items;
use crate::{AdapterOutput, CallRequest, ModelInfo, ProviderAdapter};
use nameforge_types::{NameforgeError, Result};

// ---------------------------------------------------------------------------
// GeminiAdapter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct GeminiAdapter {
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

impl GeminiAdapter {
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
        let mut gen_config = json!({
            "maxOutputTokens": opts.max_tokens.unwrap_or(self.max_tokens),
            "temperature": opts.temperature.unwrap_or(self.temperature),
        });
        for (key, value) in &opts.extra {
            // Gemini spells sampling knobs in camelCase.
            let key = match key.as_str() {
                "top_p" => "topP",
                "top_k" => "topK",
                other => other,
            };
            gen_config[key] = value.clone();
        }

        json!({
            "systemInstruction": { "parts": [{ "text": self.system_prompt }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": gen_config,
        })
    }

    fn parse_response(&self, json: Value, model: &str) -> Result<AdapterOutput> {
        let malformed = |message: &str| NameforgeError::MalformedResponse {
            provider: self.name.clone(),
            message: message.to_string(),
        };

        let candidate = json["candidates"]
            .as_array()
            .ok_or_else(|| malformed("Missing candidates in response"))?
            .first()
            .ok_or_else(|| malformed("Empty candidates array"))?;

        let text: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(malformed("Candidate has no text parts"));
        }

        Ok(AdapterOutput {
            items: parse_items(&text, &self.name),
            provider: self.name.clone(),
            model: json["modelVersion"].as_str().unwrap_or(model).to_string(),
            raw_text: text,
        })
    }

    fn parse_models(&self, json: &Value) -> Vec<ModelInfo> {
        json["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str())
                    .map(|name| {
                        let id = name.trim_start_matches("models/");
                        ModelInfo {
                            id: id.to_string(),
                            provider: self.name.clone(),
                            is_default: id == self.default_model,
                        }
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
impl ProviderAdapter for GeminiAdapter {
    async fn call(&self, request: &CallRequest) -> Result<AdapterOutput> {
        let model = request
            .options
            .model
            .as_deref()
            .unwrap_or(&self.default_model);
        let body = self.build_request_body(request);
        let http = self
            .client
            .post(format!(
                "{}/models/{}:generateContent?key={}",
                self.base_url, model, self.api_key
            ))
            .json(&body);

        let json = send_json(&self.name, self.timeout, http).await?;
        self.parse_response(json, model)
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let http = self
            .client
            .get(format!("{}/models?key={}", self.base_url, self.api_key));
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
