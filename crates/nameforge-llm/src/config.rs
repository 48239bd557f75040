//! Typed provider, router and cache configuration.
//!
//! Settings come from built-in provider defaults, an optional JSON file, and
//! environment variables (`<NAME>_API_KEY`, `ROUTER_STRATEGY`, `CACHE_TTL`, ...).
//! Environment lookups go through a closure so tests never touch the process env.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nameforge_types::{NameforgeError, Result};

use crate::strategy::{parse_weights, StrategyKind, DEFAULT_PRIORITY};

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Wire protocol family an adapter speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    OpenAiCompatible,
    Gemini,
}

// ---------------------------------------------------------------------------
// ProviderConfig
// ---------------------------------------------------------------------------

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f64 {
    0.7
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub base_url: String,
    /// Never written back out when settings are serialized.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Whether the backend can stream. Used for capability routing only.
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl ProviderConfig {
    pub fn new(
        name: impl Into<String>,
        protocol: Protocol,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            protocol,
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            stream: false,
            timeout_secs: default_timeout_secs(),
            system_prompt: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// A provider is enabled when it carries a non-blank credential.
    pub fn is_enabled(&self) -> bool {
        self.api_key
            .as_deref()
            .map_or(false, |key| !key.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Environment variable prefix, e.g. `SILICONFLOW` for `siliconflow`.
    pub fn env_prefix(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| NameforgeError::ConfigurationError {
            provider: self.name.clone(),
            message: message.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(fail("name must not be empty"));
        }
        if !self.is_enabled() {
            return Err(fail("api_key is missing"));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(fail("base_url must be an http(s) URL"));
        }
        if self.model.trim().is_empty() {
            return Err(fail("model must not be empty"));
        }
        if self.max_tokens == 0 {
            return Err(fail("max_tokens must be greater than zero"));
        }
        if self.timeout_secs == 0 {
            return Err(fail("timeout_secs must be greater than zero"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(fail("temperature must be within 0.0..=2.0"));
        }
        Ok(())
    }
}

/// Known backends with their default endpoints and models. None carry a key.
pub fn builtin_providers() -> Vec<ProviderConfig> {
    use Protocol::*;
    vec![
        ProviderConfig::new(
            "aistudio",
            OpenAiCompatible,
            "https://api-n0gca1bcpar672zf.aistudio-app.com/v1",
            "qwen3:235b",
        )
        .with_stream(true),
        ProviderConfig::new(
            "aliyun",
            OpenAiCompatible,
            "https://dashscope.aliyuncs.com/compatible-mode/v1",
            "qwen-turbo",
        ),
        ProviderConfig::new(
            "siliconflow",
            OpenAiCompatible,
            "https://api.siliconflow.cn/v1",
            "Qwen/Qwen2.5-7B-Instruct",
        ),
        ProviderConfig::new(
            "baishan",
            OpenAiCompatible,
            "https://api.baishancloud.com/v1",
            "gpt-3.5-turbo",
        ),
        ProviderConfig::new(
            "baidu",
            OpenAiCompatible,
            "https://qianfan.baidubce.com/v2",
            "ernie-speed-128k",
        ),
        ProviderConfig::new(
            "paiou",
            OpenAiCompatible,
            "https://api.ppinfra.com/v3/openai",
            "deepseek/deepseek-v3-0324",
        )
        .with_max_tokens(1000)
        .with_stream(true),
        ProviderConfig::new("openai", OpenAiCompatible, "https://api.openai.com/v1", "gpt-4o")
            .with_stream(true),
        ProviderConfig::new(
            "gemini",
            Gemini,
            "https://generativelanguage.googleapis.com/v1beta",
            "gemini-2.5-flash",
        ),
    ]
}

// ---------------------------------------------------------------------------
// RouterSettings / CacheSettings
// ---------------------------------------------------------------------------

fn default_priority() -> Vec<String> {
    DEFAULT_PRIORITY.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterSettings {
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default = "default_priority")]
    pub priority: Vec<String>,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            priority: default_priority(),
            weights: BTreeMap::new(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_entries() -> usize {
    1000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// JSON file the result cache is loaded from and saved to. In-memory only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_path: Option<PathBuf>,
    /// How long a discovered model list is reused before asking the provider again.
    #[serde(default = "default_ttl_secs")]
    pub model_ttl_secs: u64,
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn model_ttl(&self) -> Duration {
        Duration::from_secs(self.model_ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            persist_path: None,
            model_ttl_secs: default_ttl_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "builtin_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub router: RouterSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            providers: builtin_providers(),
            router: RouterSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl Settings {
    /// Built-in defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env(|key| std::env::var(key).ok());
        settings
    }

    /// JSON settings file overlaid with the process environment.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let mut settings: Self = serde_json::from_str(&data)?;
        settings.apply_env(|key| std::env::var(key).ok());
        tracing::debug!(path = %path.display(), providers = settings.providers.len(), "Loaded settings file");
        Ok(settings)
    }

    /// Overlays values found through `lookup`. Credentials already present in
    /// the file are kept; everything else set in the environment wins.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        for provider in &mut self.providers {
            let prefix = provider.env_prefix();
            if !provider.is_enabled() {
                provider.api_key = get(&format!("{prefix}_API_KEY"));
                if provider.api_key.is_none() && provider.protocol == Protocol::Gemini {
                    provider.api_key = get("GOOGLE_API_KEY");
                }
            }
            if let Some(url) = get(&format!("{prefix}_BASE_URL")) {
                provider.base_url = url;
            }
            if let Some(model) = get(&format!("{prefix}_MODEL")) {
                provider.model = model;
            }
            if let Some(max_tokens) = parse_env(&get, &format!("{prefix}_MAX_TOKENS")) {
                provider.max_tokens = max_tokens;
            }
            if let Some(timeout) = parse_env(&get, "REQUEST_TIMEOUT") {
                provider.timeout_secs = timeout;
            }
        }

        if let Some(name) = get("ROUTER_STRATEGY") {
            self.router.strategy = StrategyKind::parse(&name);
        }
        if let Some(order) = get("ROUTER_ORDER") {
            self.router.priority = order
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(raw) = get("ROUTER_WEIGHTS") {
            self.router.weights = parse_weights(&raw);
        }
        if let Some(ttl) = parse_env(&get, "CACHE_TTL") {
            self.cache.ttl_secs = ttl;
        }
        if let Some(max) = parse_env(&get, "MAX_CACHE_SIZE") {
            self.cache.max_entries = max;
        }
        if let Some(path) = get("CACHE_FILE").filter(|p| !p.trim().is_empty()) {
            self.cache.persist_path = Some(PathBuf::from(path));
        }
        if let Some(ttl) = parse_env(&get, "MODEL_CACHE_TTL") {
            self.cache.model_ttl_secs = ttl;
        }
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.is_enabled())
    }
}

fn parse_env<T, G>(get: &G, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable environment value");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
