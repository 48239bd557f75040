use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use nameforge_types::NameforgeError;

// ---------------------------------------------------------------------------
// GenerationOptions
// ---------------------------------------------------------------------------

/// Per-request generation knobs forwarded to the adapter.
///
/// Unset fields are omitted when serialized, so two option sets that differ
/// only in fields nobody set hash to the same cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Provider-specific pass-through parameters (e.g. `top_p`).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl GenerationOptions {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// CallRequest / AdapterOutput (adapter boundary)
// ---------------------------------------------------------------------------

/// What the orchestrator hands to a single adapter attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub prompt: String,
    pub count: usize,
    pub options: GenerationOptions,
}

impl CallRequest {
    pub fn new(prompt: impl Into<String>, count: usize) -> Self {
        Self {
            prompt: prompt.into(),
            count,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

/// One generated entry: the content itself, its explanation, and who produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedItem {
    pub content: String,
    pub meaning: String,
    pub source: String,
}

impl GeneratedItem {
    pub fn new(
        content: impl Into<String>,
        meaning: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            meaning: meaning.into(),
            source: source.into(),
        }
    }
}

/// Successful output of one adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterOutput {
    pub items: Vec<GeneratedItem>,
    pub provider: String,
    pub model: String,
    pub raw_text: String,
}

// ---------------------------------------------------------------------------
// GenerationResult
// ---------------------------------------------------------------------------

/// Final outcome of an orchestrated request, also the value stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub success: bool,
    pub items: Vec<GeneratedItem>,
    pub provider: String,
    pub model: String,
    pub raw_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl GenerationResult {
    pub fn from_output(output: AdapterOutput) -> Self {
        Self {
            success: true,
            items: output.items,
            provider: output.provider,
            model: output.model,
            raw_text: output.raw_text,
            error: None,
            generated_at: Utc::now(),
        }
    }

    /// Structured failure; `provider` is reported as `"none"`.
    pub fn failure(error: &NameforgeError) -> Self {
        Self {
            success: false,
            items: Vec::new(),
            provider: "none".to_string(),
            model: String::new(),
            raw_text: String::new(),
            error: Some(error.to_string()),
            generated_at: Utc::now(),
        }
    }

    /// Caps the item list at `count`. Nothing else about the result changes.
    pub fn truncated(mut self, count: usize) -> Self {
        self.items.truncate(count);
        self
    }
}

// ---------------------------------------------------------------------------
// RoutingContext / ProviderInfo / ModelInfo
// ---------------------------------------------------------------------------

/// Per-request routing hints consumed by router strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingContext {
    pub avoid: BTreeSet<String>,
    pub needs_streaming: bool,
}

impl RoutingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn avoiding<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.avoid.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn streaming(mut self) -> Self {
        self.needs_streaming = true;
        self
    }
}

/// Registry-side metadata about one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub enabled: bool,
    pub supports_streaming: bool,
    pub default_model: String,
    pub base_url: String,
}

impl ProviderInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            supports_streaming: false,
            default_model: String::new(),
            base_url: String::new(),
        }
    }

    pub fn with_streaming(mut self, supports_streaming: bool) -> Self {
        self.supports_streaming = supports_streaming;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub is_default: bool,
}

impl ModelInfo {
    pub fn default_for(provider: &str, model: &str) -> Self {
        Self {
            id: model.to_string(),
            provider: provider.to_string(),
            is_default: true,
        }
    }
}

// ---------------------------------------------------------------------------
// GenerateRequest / GenerateResponse (caller-facing shapes)
// ---------------------------------------------------------------------------

fn default_count() -> usize {
    5
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Items wanted. Every outcome, provider or fallback, is capped at this;
    /// `0` is served as `1`.
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default = "default_true")]
    pub allow_fallback: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub avoid: Vec<String>,
    #[serde(default)]
    pub needs_streaming: bool,
    #[serde(flatten)]
    pub options: GenerationOptions,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>, count: usize) -> Self {
        Self {
            prompt: prompt.into(),
            count,
            preferred_provider: None,
            use_cache: true,
            allow_fallback: true,
            avoid: Vec::new(),
            needs_streaming: false,
            options: GenerationOptions::default(),
        }
    }

    pub fn preferred(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.allow_fallback = false;
        self
    }

    pub fn avoiding<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.avoid.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn needing_streaming(mut self) -> Self {
        self.needs_streaming = true;
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// `count` with the at-least-one rule applied.
    pub fn item_count(&self) -> usize {
        self.count.max(1)
    }

    pub fn routing_context(&self) -> RoutingContext {
        RoutingContext {
            avoid: self.avoid.iter().cloned().collect(),
            needs_streaming: self.needs_streaming,
        }
    }

    pub fn call_request(&self) -> CallRequest {
        CallRequest {
            prompt: self.prompt.clone(),
            count: self.item_count(),
            options: self.options.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub items: Vec<GeneratedItem>,
    pub provider_used: String,
    pub model_used: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&GenerationResult> for GenerateResponse {
    fn from(result: &GenerationResult) -> Self {
        Self {
            success: result.success,
            items: result.items.clone(),
            provider_used: result.provider.clone(),
            model_used: result.model.clone(),
            error: result.error.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
