//! Multi-provider request routing for text generation.
//!
//! Provides the `ProviderAdapter` trait and `DynProvider` wrapper, concrete
//! OpenAI-compatible and Gemini adapters, the `AdapterRegistry`, router
//! strategies, a TTL-bounded result cache, and the `Orchestrator` that ties
//! them together with synthetic fallback.

mod cache;
mod client;
pub mod config;
mod fallback;
mod gemini;
mod http;
mod openai;
mod parse;
mod provider;
mod registry;
pub mod strategy;
mod types;

pub use cache::{cache_key, CacheStats, ResultCache};
pub use client::*;
pub use config::{Protocol, ProviderConfig, Settings};
pub use fallback::{synthesize, FALLBACK_MODEL, FALLBACK_PROVIDER};
pub use gemini::GeminiAdapter;
pub use openai::OpenAiCompatAdapter;
pub use parse::parse_items;
pub use provider::*;
pub use registry::AdapterRegistry;
pub use strategy::{RouterStrategy, StrategyKind};
pub use types::*;
