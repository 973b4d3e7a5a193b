use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for all proxy operations.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("authentication failed: {0}")]
    Unauthorized(String),

    #[error("no credentials available for provider {provider}, model {model}")]
    NoCredentials { provider: String, model: String },

    #[error("upstream error (status {status}): {body}")]
    Upstream {
        status: u16,
        body: String,
        /// Parsed from upstream `Retry-After` header (seconds), if present.
        retry_after_secs: Option<u64>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("request cancelled: {0}")]
    Cancelled(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Internal(_) | Self::Stream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NoCredentials { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Network(_) => StatusCode::BAD_GATEWAY,
            Self::Translation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cancelled(_) => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// Whether the conductor may advance to the next credential after this error.
    /// Upstream 401/403/429/5xx, network, and translation failures are
    /// recoverable by switching credentials; everything else surfaces.
    ///
    /// `Translation` counts as retryable because the conductor consults this
    /// only for errors raised before an upstream response (request rewriting,
    /// payload finalization). Translation failures after a successful
    /// response surface directly and never reach this classifier.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unauthorized(_) | Self::Network(_) | Self::Translation(_) => true,
            Self::Upstream { status, .. } => {
                matches!(*status, 401 | 403 | 429) || (500..=599).contains(status)
            }
            _ => false,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Unauthorized(_) => "authentication_error",
            Self::NoCredentials { .. } => "insufficient_quota",
            Self::BadRequest(_) => "invalid_request_error",
            Self::Upstream { .. } => "upstream_error",
            Self::NotImplemented(_) => "not_implemented_error",
            _ => "server_error",
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Self::Unauthorized(_) => "invalid_api_key",
            Self::NoCredentials { .. } => "insufficient_quota",
            Self::BadRequest(_) => "invalid_request",
            Self::NotImplemented(_) => "not_implemented",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // For upstream errors, pass through the original JSON body when valid
        if let Self::Upstream { body, .. } = &self
            && serde_json::from_str::<serde_json::Value>(body).is_ok()
        {
            return (status, [("content-type", "application/json")], body.clone()).into_response();
        }

        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.error_code(),
            }
        });

        (
            status,
            [("content-type", "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network(format!("request timed out: {e}"))
        } else if e.is_connect() {
            Self::Network(format!("connection failed: {e}"))
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        Self::Translation(format!("JSON error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ProxyError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ProxyError::NotImplemented("x".into()).status_code(),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            ProxyError::Upstream {
                status: 429,
                body: String::new(),
                retry_after_secs: None
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_retryable_classification() {
        for status in [401u16, 403, 429, 500, 503] {
            assert!(
                ProxyError::Upstream {
                    status,
                    body: String::new(),
                    retry_after_secs: None
                }
                .is_retryable(),
                "status {status} should advance to the next credential"
            );
        }
        assert!(
            !ProxyError::Upstream {
                status: 404,
                body: String::new(),
                retry_after_secs: None
            }
            .is_retryable()
        );
        assert!(ProxyError::Network("io".into()).is_retryable());
        assert!(!ProxyError::BadRequest("x".into()).is_retryable());
        assert!(!ProxyError::Cancelled("x".into()).is_retryable());
    }
}
