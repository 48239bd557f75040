use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::Instrument;

use nameforge_types::{FailureKind, NameforgeError, Result};

use crate::cache::{cache_key, CacheStats, ResultCache};
use crate::config::Settings;
use crate::fallback;
use crate::registry::AdapterRegistry;
use crate::strategy::{self, RouterStrategy};
use crate::{
    AdapterOutput, CallRequest, DynProvider, GenerateRequest, GenerationOptions,
    GenerationResult, ModelInfo, ProviderInfo, RoutingContext,
};

const TEST_PROMPT: &str = "请生成1个中文姓名，格式：姓名：含义";
const TEST_MAX_TOKENS: u32 = 100;
const DEFAULT_MODEL_TTL: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Hooks run around every adapter attempt, in registration order.
pub trait Middleware: Send + Sync {
    fn before_call(&self, _provider: &str, _request: &CallRequest) {}
    fn after_call(&self, _provider: &str, _outcome: &Result<AdapterOutput>, _elapsed: Duration) {}
}

// ---------------------------------------------------------------------------
// Built-in middleware: LoggingMiddleware
// ---------------------------------------------------------------------------

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before_call(&self, provider: &str, request: &CallRequest) {
        tracing::debug!(
            provider,
            count = request.count,
            prompt_chars = request.prompt.chars().count(),
            "Provider request"
        );
    }

    fn after_call(&self, provider: &str, outcome: &Result<AdapterOutput>, elapsed: Duration) {
        match outcome {
            Ok(output) => tracing::info!(
                provider,
                model = %output.model,
                items = output.items.len(),
                latency_ms = elapsed.as_millis() as u64,
                "Provider response"
            ),
            Err(e) => tracing::debug!(
                provider,
                kind = %e.kind(),
                latency_ms = elapsed.as_millis() as u64,
                "Provider call returned an error"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in middleware: CallStatsMiddleware
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProviderCallStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Per-provider attempt counters. Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct CallStatsMiddleware {
    stats: Arc<Mutex<HashMap<String, ProviderCallStats>>>,
}

impl CallStatsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_provider(&self, provider: &str) -> ProviderCallStats {
        self.lock().get(provider).copied().unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<String, ProviderCallStats> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProviderCallStats>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Middleware for CallStatsMiddleware {
    fn before_call(&self, provider: &str, _request: &CallRequest) {
        self.lock().entry(provider.to_string()).or_default().attempts += 1;
    }

    fn after_call(&self, provider: &str, outcome: &Result<AdapterOutput>, _elapsed: Duration) {
        let mut stats = self.lock();
        let entry = stats.entry(provider.to_string()).or_default();
        if outcome.is_ok() {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Status / model listing shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    #[serde(flatten)]
    pub info: ProviderInfo,
    #[serde(flatten)]
    pub calls: ProviderCallStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderModels {
    pub provider: String,
    pub models: Vec<ModelInfo>,
    /// `false` when discovery failed and only the declared model is listed.
    pub discovered: bool,
    /// Discovery failed and an earlier list past its TTL is served instead.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

struct CachedModels {
    fetched_at: Instant,
    models: Vec<ModelInfo>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Entry point for generation requests: cache, route, attempt, fall back.
///
/// Built once with its registry, strategy and cache, then shared by `Arc`.
pub struct Orchestrator {
    registry: AdapterRegistry,
    strategy: Arc<dyn RouterStrategy>,
    cache: ResultCache,
    middleware: Vec<Box<dyn Middleware>>,
    call_stats: CallStatsMiddleware,
    model_ttl: Duration,
    models: Mutex<HashMap<String, CachedModels>>,
}

impl Orchestrator {
    pub fn new(
        registry: AdapterRegistry,
        strategy: Arc<dyn RouterStrategy>,
        cache: ResultCache,
    ) -> Self {
        let call_stats = CallStatsMiddleware::new();
        Self {
            registry,
            strategy,
            cache,
            middleware: vec![Box::new(call_stats.clone())],
            call_stats,
            model_ttl: DEFAULT_MODEL_TTL,
            models: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let registry = AdapterRegistry::build(&settings.providers);
        let strategy = strategy::from_settings(&settings.router);
        tracing::info!(
            strategy = strategy.name(),
            providers = registry.len(),
            "Orchestrator configured"
        );
        Self::new(registry, strategy, ResultCache::from_settings(&settings.cache))
            .with_model_ttl(settings.cache.model_ttl())
            .with_middleware(LoggingMiddleware)
    }

    pub fn from_env() -> Self {
        Self::from_settings(&Settings::from_env())
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    /// How long a discovered model list is reused. Zero asks the provider every time.
    pub fn with_model_ttl(mut self, ttl: Duration) -> Self {
        self.model_ttl = ttl;
        self
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Serves `request`. Adapter failures never escape: the outcome is always
    /// a result, successful or `{success: false, error}`.
    pub async fn generate(&self, request: &GenerateRequest) -> GenerationResult {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("generate", %request_id, count = request.count);
        self.generate_inner(request).instrument(span).await
    }

    async fn generate_inner(&self, request: &GenerateRequest) -> GenerationResult {
        let count = request.item_count();

        // 1. Cache
        let key = request
            .use_cache
            .then(|| cache_key(&request.prompt, count, &request.options));
        if let Some(key) = &key {
            if let Some(hit) = self.cache.get(key) {
                tracing::debug!(provider = %hit.provider, "Serving cached result");
                return hit;
            }
        }

        // 2. Route
        let order = self.route(
            request.preferred_provider.as_deref(),
            &request.routing_context(),
        );
        if order.is_empty() {
            let err = NameforgeError::NoRouteAvailable;
            tracing::warn!(error = %err, "Request cannot be routed");
            return GenerationResult::failure(&err);
        }
        tracing::debug!(order = ?order, strategy = self.strategy.name(), "Routing request");

        // 3. Attempt candidates in order; first success wins.
        let call = request.call_request();
        let mut attempts = 0usize;
        let mut last_error: Option<NameforgeError> = None;

        for name in &order {
            let Some(provider) = self.registry.get(name) else {
                continue;
            };
            attempts += 1;
            match self.attempt(provider, &call).await {
                Ok(output) => {
                    let result = GenerationResult::from_output(output).truncated(count);
                    tracing::info!(
                        provider = %name,
                        items = result.items.len(),
                        attempts,
                        "Generation succeeded"
                    );
                    if let Some(key) = key {
                        self.cache.put(key, result.clone());
                    }
                    return result;
                }
                Err(e) => {
                    if e.kind() == FailureKind::Unexpected {
                        tracing::error!(provider = %name, error = %e, "Unexpected adapter failure, trying next provider");
                    } else {
                        tracing::warn!(provider = %name, kind = %e.kind(), error = %e, "Provider call failed, trying next provider");
                    }
                    last_error = Some(e);
                }
            }
        }

        // 4. Exhausted
        if request.allow_fallback {
            tracing::warn!(attempts, "All providers failed, returning synthesized result");
            let result = fallback::synthesize(&request.prompt, count);
            if let Some(key) = key {
                self.cache.put(key, result.clone());
            }
            return result;
        }

        let err = NameforgeError::AllCandidatesExhausted {
            attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no candidate could be attempted".to_string()),
        };
        tracing::error!(error = %err, "Generation failed");
        GenerationResult::failure(&err)
    }

    /// One isolated adapter attempt wrapped in the middleware chain. The call
    /// runs on its own task so a panicking adapter becomes an error; the task
    /// is aborted if this future is dropped first.
    async fn attempt(&self, provider: &DynProvider, call: &CallRequest) -> Result<AdapterOutput> {
        let name = provider.name().to_string();
        for m in &self.middleware {
            m.before_call(&name, call);
        }

        let started = Instant::now();
        let mut task = {
            let provider = provider.clone();
            let call = call.clone();
            AbortOnDrop(tokio::spawn(async move { provider.call(&call).await }))
        };
        let outcome = match (&mut task.0).await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(NameforgeError::AdapterPanicked {
                provider: name.clone(),
                message: panic_message(join_err),
            }),
        };
        let elapsed = started.elapsed();

        for m in &self.middleware {
            m.after_call(&name, &outcome, elapsed);
        }
        outcome
    }

    /// Candidate order the strategy would use for these hints.
    pub fn route(&self, preferred: Option<&str>, context: &RoutingContext) -> Vec<String> {
        self.strategy
            .order(&self.registry.providers(), preferred, context)
    }

    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.registry.providers()
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.registry
            .providers()
            .into_iter()
            .map(|info| {
                let calls = self.call_stats.for_provider(&info.name);
                ProviderStatus { info, calls }
            })
            .collect()
    }

    /// Single uncached call against `name` with a short fixed prompt.
    pub async fn test_provider(&self, name: &str) -> GenerationResult {
        let Some(provider) = self.registry.get(name) else {
            return GenerationResult::failure(&NameforgeError::Other(format!(
                "Provider '{name}' not registered"
            )));
        };

        let call = CallRequest::new(TEST_PROMPT, 1)
            .with_options(GenerationOptions::default().with_max_tokens(TEST_MAX_TOKENS));
        match self.attempt(provider, &call).await {
            Ok(output) => GenerationResult::from_output(output),
            Err(e) => {
                tracing::warn!(provider = name, error = %e, "Provider test failed");
                let mut result = GenerationResult::failure(&e);
                result.provider = name.to_string();
                result
            }
        }
    }

    /// Models per provider. Discovered lists are reused for the model TTL;
    /// when discovery fails the last good list is served, and without one the
    /// declared default model.
    pub async fn list_models(&self) -> Vec<ProviderModels> {
        let mut listing = Vec::with_capacity(self.registry.len());
        for provider in self.registry.iter() {
            let name = provider.name().to_string();
            if let Some(models) = self.cached_models(&name, true) {
                tracing::debug!(provider = %name, "Using cached model list");
                listing.push(ProviderModels {
                    provider: name,
                    models,
                    discovered: true,
                    stale: false,
                });
                continue;
            }

            let entry = match provider.list_models().await {
                Ok(models) if !models.is_empty() => {
                    self.lock_models().insert(
                        name.clone(),
                        CachedModels {
                            fetched_at: Instant::now(),
                            models: models.clone(),
                        },
                    );
                    ProviderModels {
                        provider: name,
                        models,
                        discovered: true,
                        stale: false,
                    }
                }
                outcome => match self.cached_models(&name, false) {
                    Some(models) => {
                        tracing::warn!(
                            provider = %name,
                            error = ?outcome.err().map(|e| e.to_string()),
                            "Model discovery failed, serving previous list"
                        );
                        ProviderModels {
                            provider: name,
                            models,
                            discovered: true,
                            stale: true,
                        }
                    }
                    None => {
                        tracing::debug!(provider = %name, "Model discovery unavailable, using declared model");
                        ProviderModels {
                            models: vec![ModelInfo::default_for(&name, provider.default_model())],
                            provider: name,
                            discovered: false,
                            stale: false,
                        }
                    }
                },
            };
            listing.push(entry);
        }
        listing
    }

    /// Forgets discovered model lists for one provider, or for all of them.
    pub fn clear_model_cache(&self, provider: Option<&str>) {
        let mut models = self.lock_models();
        match provider {
            Some(name) => {
                models.remove(name);
            }
            None => models.clear(),
        }
        tracing::info!(provider = provider.unwrap_or("*"), "Model cache cleared");
    }

    fn cached_models(&self, provider: &str, fresh_only: bool) -> Option<Vec<ModelInfo>> {
        let models = self.lock_models();
        let cached = models.get(provider)?;
        if fresh_only && cached.fetched_at.elapsed() >= self.model_ttl {
            return None;
        }
        Some(cached.models.clone())
    }

    fn lock_models(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedModels>> {
        self.models.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("Result cache cleared");
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("providers", &self.registry.names())
            .field("strategy", &self.strategy.name())
            .field("cache", &self.cache)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Aborts the wrapped task when dropped. Aborting a finished task is a no-op.
struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
