//! Shared error taxonomy for the nameforge routing layer.
//!
//! This crate provides the foundational types used across the other nameforge crates:
//! - `NameforgeError`: unified error taxonomy (configuration, adapter calls, routing)
//! - `FailureKind`: the coarse classification adapters report failures under
//! - `Result`: convenience alias

use serde::{Deserialize, Serialize};

/// Unified error type for all nameforge subsystems.
#[derive(Debug, thiserror::Error)]
pub enum NameforgeError {
    // === Configuration Errors ===
    #[error("Provider {provider} is misconfigured: {message}")]
    ConfigurationError { provider: String, message: String },

    // === Adapter Call Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout {
        provider: String,
        timeout_ms: u64,
    },

    #[error("Provider {provider} sent an unusable response: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("Adapter for {provider} panicked: {message}")]
    AdapterPanicked { provider: String, message: String },

    // === Routing Errors ===
    #[error("No provider available to route the request")]
    NoRouteAvailable,

    #[error("All {attempts} candidate providers failed, last error: {last_error}")]
    AllCandidatesExhausted { attempts: usize, last_error: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse failure classification carried across the adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ApiError,
    Timeout,
    Unexpected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ApiError => "api_error",
            FailureKind::Timeout => "timeout",
            FailureKind::Unexpected => "unexpected",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl NameforgeError {
    /// Classifies the error the way an adapter failure is reported upstream.
    pub fn kind(&self) -> FailureKind {
        match self {
            NameforgeError::ProviderError { .. }
            | NameforgeError::RateLimited { .. }
            | NameforgeError::AuthError { .. } => FailureKind::ApiError,
            NameforgeError::RequestTimeout { .. } => FailureKind::Timeout,
            _ => FailureKind::Unexpected,
        }
    }
}

/// A convenience alias for `Result<T, NameforgeError>`.
pub type Result<T> = std::result::Result<T, NameforgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_provider_error() {
        let err = NameforgeError::ProviderError {
            provider: "siliconflow".into(),
            status: 500,
            message: "internal server error".into(),
        };
        assert_eq!(
            err.to_string(),
            "Provider siliconflow returned HTTP 500: internal server error"
        );
    }

    #[test]
    fn error_display_rate_limited() {
        let err = NameforgeError::RateLimited {
            provider: "aliyun".into(),
            retry_after_ms: 3000,
        };
        assert_eq!(err.to_string(), "Rate limited by aliyun, retry after 3000ms");
    }

    #[test]
    fn error_display_configuration() {
        let err = NameforgeError::ConfigurationError {
            provider: "paiou".into(),
            message: "base_url must not be empty".into(),
        };
        assert_eq!(
            err.to_string(),
            "Provider paiou is misconfigured: base_url must not be empty"
        );
    }

    #[test]
    fn error_display_routing() {
        assert_eq!(
            NameforgeError::NoRouteAvailable.to_string(),
            "No provider available to route the request"
        );
        let err = NameforgeError::AllCandidatesExhausted {
            attempts: 2,
            last_error: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "All 2 candidate providers failed, last error: boom"
        );
    }

    #[test]
    fn error_display_other() {
        let err = NameforgeError::Other("something went wrong".into());
        assert_eq!(err.to_string(), "something went wrong");
    }

    // --- kind ---

    #[test]
    fn kind_classifies_adapter_failures() {
        let api = NameforgeError::AuthError {
            provider: "x".into(),
        };
        assert_eq!(api.kind(), FailureKind::ApiError);

        let timeout = NameforgeError::RequestTimeout {
            provider: "x".into(),
            timeout_ms: 30_000,
        };
        assert_eq!(timeout.kind(), FailureKind::Timeout);

        let malformed = NameforgeError::MalformedResponse {
            provider: "x".into(),
            message: "no choices".into(),
        };
        assert_eq!(malformed.kind(), FailureKind::Unexpected);
        assert_eq!(malformed.kind().to_string(), "unexpected");
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::ApiError).unwrap();
        assert_eq!(json, "\"api_error\"");
    }

    #[test]
    fn routing_errors_are_unexpected() {
        assert_eq!(NameforgeError::NoRouteAvailable.kind(), FailureKind::Unexpected);
        let err = NameforgeError::AdapterPanicked {
            provider: "gemini".into(),
            message: "index out of bounds".into(),
        };
        assert_eq!(err.kind(), FailureKind::Unexpected);
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: NameforgeError = io.into();
        assert!(matches!(err, NameforgeError::Io(_)));
    }
}
