//! HTTP plumbing shared by the concrete adapters: client construction,
//! sending, and mapping status codes onto the error taxonomy.

use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use nameforge_types::{NameforgeError, Result};

use crate::config::ProviderConfig;

pub(crate) fn build_client(config: &ProviderConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| NameforgeError::ConfigurationError {
            provider: config.name.clone(),
            message: format!("failed to build HTTP client: {e}"),
        })
}

/// Sends `request` and returns the decoded JSON body of a 2xx response.
pub(crate) async fn send_json(
    provider: &str,
    timeout: Duration,
    request: reqwest::RequestBuilder,
) -> Result<Value> {
    let resp = request
        .send()
        .await
        .map_err(|e| transport_error(provider, &e, timeout))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| transport_error(provider, &e, timeout))?;

    if !status.is_success() {
        return Err(map_error(provider, status, &body));
    }

    serde_json::from_str(&body).map_err(|e| NameforgeError::MalformedResponse {
        provider: provider.to_string(),
        message: format!("Failed to parse response JSON: {e}"),
    })
}

pub(crate) fn transport_error(
    provider: &str,
    err: &reqwest::Error,
    timeout: Duration,
) -> NameforgeError {
    if err.is_timeout() {
        NameforgeError::RequestTimeout {
            provider: provider.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        NameforgeError::ProviderError {
            provider: provider.to_string(),
            status: 0,
            message: err.to_string(),
        }
    }
}

pub(crate) fn map_error(provider: &str, status: StatusCode, body: &str) -> NameforgeError {
    let provider = provider.to_string();
    match status.as_u16() {
        429 => {
            let retry_ms = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(1000);
            NameforgeError::RateLimited {
                provider,
                retry_after_ms: retry_ms,
            }
        }
        401 | 403 => NameforgeError::AuthError { provider },
        code @ 500..=599 => NameforgeError::ProviderError {
            provider,
            status: code,
            message: extract_error_message(body),
        },
        code => NameforgeError::ProviderError {
            provider,
            status: code,
            message: extract_error_message(body),
        },
    }
}

/// Pulls `error.message` (OpenAI and Gemini shape) or falls back to the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn rate_limit_reads_retry_after() {
        let err = map_error(
            "aliyun",
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"message":"slow down","retry_after":2.5}}"#,
        );
        match err {
            NameforgeError::RateLimited {
                provider,
                retry_after_ms,
            } => {
                assert_eq!(provider, "aliyun");
                assert_eq!(retry_after_ms, 2500);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn auth_statuses() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            assert!(matches!(
                map_error("x", status, ""),
                NameforgeError::AuthError { .. }
            ));
        }
    }

    #[test]
    fn server_errors_are_api_errors() {
        let err = map_error("x", StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(err, NameforgeError::ProviderError { status: 502, .. }));
        assert_eq!(err.kind(), nameforge_types::FailureKind::ApiError);
    }

    #[test]
    fn client_errors_carry_message() {
        let err = map_error(
            "x",
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"model not found"}}"#,
        );
        match err {
            NameforgeError::ProviderError {
                status,
                message,
                ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(message, "model not found");
            }
            other => panic!("expected ProviderError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_json_rejects_non_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = send_json("x", Duration::from_secs(5), client.get(server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, NameforgeError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn send_json_maps_timeouts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let timeout = Duration::from_millis(100);
        let client = reqwest::Client::builder().timeout(timeout).build().unwrap();
        let err = send_json("slow", timeout, client.get(server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NameforgeError::RequestTimeout { timeout_ms: 100, .. }
        ));
        assert_eq!(err.kind(), nameforge_types::FailureKind::Timeout);
    }
}
