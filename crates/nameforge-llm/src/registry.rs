//! Adapter registry: the set of constructed providers, in configuration order.

use nameforge_types::Result;

use crate::config::{ProviderConfig, Protocol};
use crate::gemini::GeminiAdapter;
use crate::openai::OpenAiCompatAdapter;
use crate::{DynProvider, ProviderAdapter, ProviderInfo};

type Constructor = fn(&ProviderConfig) -> Result<DynProvider>;

fn openai_compatible(config: &ProviderConfig) -> Result<DynProvider> {
    Ok(DynProvider::new(OpenAiCompatAdapter::from_config(config)?))
}

fn gemini(config: &ProviderConfig) -> Result<DynProvider> {
    Ok(DynProvider::new(GeminiAdapter::from_config(config)?))
}

const CONSTRUCTORS: &[(Protocol, Constructor)] = &[
    (Protocol::OpenAiCompatible, openai_compatible),
    (Protocol::Gemini, gemini),
];

fn constructor_for(protocol: Protocol) -> Option<Constructor> {
    CONSTRUCTORS
        .iter()
        .find(|(p, _)| *p == protocol)
        .map(|(_, ctor)| *ctor)
}

#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    providers: Vec<DynProvider>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs an adapter for every enabled config. A provider that fails
    /// to construct is logged and left out; no network calls are made.
    pub fn build<'a, I>(configs: I) -> Self
    where
        I: IntoIterator<Item = &'a ProviderConfig>,
    {
        let mut registry = Self::new();
        for config in configs {
            if !config.is_enabled() {
                tracing::debug!(provider = %config.name, "Skipping provider without credentials");
                continue;
            }
            let Some(ctor) = constructor_for(config.protocol) else {
                tracing::warn!(provider = %config.name, protocol = ?config.protocol, "No adapter for protocol");
                continue;
            };
            match ctor(config) {
                Ok(provider) => registry.register_dyn(provider),
                Err(e) => {
                    tracing::warn!(provider = %config.name, error = %e, "Failed to construct adapter, omitting provider");
                }
            }
        }
        tracing::info!(providers = ?registry.names(), "Adapter registry ready");
        registry
    }

    pub fn register(&mut self, adapter: impl ProviderAdapter + 'static) {
        self.register_dyn(DynProvider::new(adapter));
    }

    /// Appends `provider`. A name that is already registered is kept as-is.
    pub fn register_dyn(&mut self, provider: DynProvider) {
        if self.contains(provider.name()) {
            tracing::warn!(provider = %provider.name(), "Duplicate provider name, keeping the first");
            return;
        }
        self.providers.push(provider);
    }

    pub fn get(&self, name: &str) -> Option<&DynProvider> {
        self.providers.iter().find(|p| p.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.providers.iter().map(DynProvider::info).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DynProvider> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
