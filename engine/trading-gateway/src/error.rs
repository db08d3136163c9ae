//! Error types for the TradingGateway

use serde::Serialize;
use thiserror::Error;
use warp::http::StatusCode;

/// Errors that can occur in the TradingGateway
///
/// Every message here may reach the browser, so none of them may carry
/// upstream response bodies or header values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Reserved header not allowed: {0}")]
    SpoofedHeader(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream error: {message}")]
    Upstream { status: Option<u16>, message: String },

    #[error("Session store error: {0}")]
    Session(String),
}

impl GatewayError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        GatewayError::Unauthorized(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        GatewayError::Malformed(message.into())
    }

    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        GatewayError::Upstream { status, message: message.into() }
    }

    /// HTTP status returned to the client for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Malformed(_) | GatewayError::SpoofedHeader(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Config(_) | GatewayError::Session(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable client-facing body
    pub fn body(&self) -> ErrorBody {
        let error = match self {
            GatewayError::Unauthorized(message)
            | GatewayError::Malformed(message)
            | GatewayError::NotFound(message) => message.clone(),
            GatewayError::SpoofedHeader(_) => "reserved header not allowed".to_string(),
            // Configuration and store details stay in the logs.
            GatewayError::Config(_) => "service not configured".to_string(),
            GatewayError::Session(_) => "session unavailable".to_string(),
            GatewayError::Upstream { message, .. } => message.clone(),
        };
        let upstream_status = match self {
            GatewayError::Upstream { status, .. } => *status,
            _ => None,
        };

        ErrorBody { ok: false, error, upstream_status }
    }
}

/// `{ ok: false, error }` body shared by every endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

impl warp::reject::Reject for GatewayError {}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        GatewayError::Session(err.to_string())
    }
}

/// Result type for TradingGateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::unauthorized("x").status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::malformed("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            GatewayError::SpoofedHeader("poly_x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(GatewayError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayError::Config("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(GatewayError::upstream(Some(500), "x").status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_body_hides_internal_detail() {
        let body = GatewayError::Config("RELAYER_API_KEY not set".into()).body();
        assert!(!body.ok);
        assert_eq!(body.error, "service not configured");

        let body = GatewayError::SpoofedHeader("POLY_API_KEY".into()).body();
        assert!(!body.error.contains("POLY_API_KEY"));

        let json = serde_json::to_value(GatewayError::upstream(Some(503), "venue error").body())
            .unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["upstreamStatus"], 503);
    }
}
