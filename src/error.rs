//! Error types for chatrelay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::Duration;

/// Result type alias for routing operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Provider name reported in the error envelope when none could be determined.
pub const UNKNOWN_PROVIDER: &str = "unknown";

/// Every way a completion can fail.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        provider: Option<String>,
    },

    #[error("Unsupported provider '{provider}'")]
    UnsupportedProvider { provider: String },

    #[error("No API key available for provider '{provider}'")]
    MissingCredential { provider: String },

    #[error("{provider} API error: {message}")]
    Upstream {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Failed to reach provider '{provider}': {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Provider '{provider}' did not respond within {}ms", after.as_millis())]
    Timeout { provider: String, after: Duration },

    #[error("Request to provider '{provider}' was cancelled")]
    Cancelled { provider: String },
}

impl ProxyError {
    pub fn invalid_request(message: impl Into<String>, provider: Option<&str>) -> Self {
        ProxyError::InvalidRequest {
            message: message.into(),
            provider: provider.map(str::to_string),
        }
    }

    /// Stable machine-readable code used in the `error.code` envelope field.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest { .. } => "invalid_request",
            ProxyError::UnsupportedProvider { .. } => "unsupported_provider",
            ProxyError::MissingCredential { .. } => "missing_credential",
            ProxyError::Upstream { .. } => "upstream_error",
            ProxyError::Transport { .. } => "transport_error",
            ProxyError::Timeout { .. } => "timeout",
            ProxyError::Cancelled { .. } => "cancelled",
        }
    }

    /// Provider the failure is attributed to, when known.
    pub fn provider(&self) -> Option<&str> {
        match self {
            ProxyError::InvalidRequest { provider, .. } => provider.as_deref(),
            ProxyError::UnsupportedProvider { provider }
            | ProxyError::MissingCredential { provider }
            | ProxyError::Upstream { provider, .. }
            | ProxyError::Transport { provider, .. }
            | ProxyError::Timeout { provider, .. }
            | ProxyError::Cancelled { provider } => Some(provider),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ProxyError::UnsupportedProvider { .. } => StatusCode::BAD_REQUEST,
            ProxyError::MissingCredential { .. } => StatusCode::UNAUTHORIZED,
            ProxyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Transport { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether the failure was a bounded wait running out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProxyError::Timeout { .. })
    }

    /// The `{"error": {...}}` envelope shared by JSON and SSE error responses.
    pub fn envelope(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "provider": self.provider().unwrap_or(UNKNOWN_PROVIDER),
            }
        })
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status_code(), axum::Json(self.envelope())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_field_names() {
        let err = ProxyError::MissingCredential {
            provider: "openai".to_string(),
        };
        let body = err.envelope();
        assert_eq!(body["error"]["code"], "missing_credential");
        assert_eq!(body["error"]["provider"], "openai");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("openai"));
    }

    #[test]
    fn test_envelope_unknown_provider() {
        let err = ProxyError::invalid_request("messages must not be empty", None);
        assert_eq!(err.envelope()["error"]["provider"], UNKNOWN_PROVIDER);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::invalid_request("x", None).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::UnsupportedProvider {
                provider: "cohere".into()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::Upstream {
                provider: "claude".into(),
                status: Some(401),
                message: "invalid key".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Timeout {
                provider: "openai".into(),
                after: Duration::from_millis(50)
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_upstream_message_includes_upstream_text() {
        let err = ProxyError::Upstream {
            provider: "openai".into(),
            status: Some(401),
            message: "invalid key".into(),
        };
        assert_eq!(err.to_string(), "openai API error: invalid key");
    }

    #[test]
    fn test_timeout_display() {
        let err = ProxyError::Timeout {
            provider: "mistral".into(),
            after: Duration::from_millis(250),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("250ms"));
    }
}
