use async_trait::async_trait;
use std::sync::Arc;

use nameforge_types::Result;

use crate::{AdapterOutput, CallRequest, ModelInfo, ProviderInfo};

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

/// One backend's wire protocol behind a uniform call/result interface.
///
/// Adapters are configured once at construction and are never mutated by the
/// router, so every method takes `&self`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn call(&self, request: &CallRequest) -> Result<AdapterOutput>;

    /// Models the backend offers. Defaults to the declared model only.
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo::default_for(self.name(), self.default_model())])
    }

    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    fn base_url(&self) -> &str;
    fn supports_streaming(&self) -> bool;
}

// ---------------------------------------------------------------------------
// DynProvider
// ---------------------------------------------------------------------------

/// Shared handle to a type-erased adapter. Cloning is cheap.
#[derive(Clone)]
pub struct DynProvider(Arc<dyn ProviderAdapter>);

impl DynProvider {
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        Self(Arc::new(provider))
    }

    pub async fn call(&self, request: &CallRequest) -> Result<AdapterOutput> {
        self.0.call(request).await
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.0.list_models().await
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn default_model(&self) -> &str {
        self.0.default_model()
    }

    pub fn base_url(&self) -> &str {
        self.0.base_url()
    }

    pub fn supports_streaming(&self) -> bool {
        self.0.supports_streaming()
    }

    pub fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.name().to_string(),
            enabled: true,
            supports_streaming: self.supports_streaming(),
            default_model: self.default_model().to_string(),
            base_url: self.base_url().to_string(),
        }
    }
}

impl std::fmt::Debug for DynProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynProvider")
            .field("name", &self.name())
            .field("default_model", &self.default_model())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
