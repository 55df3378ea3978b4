use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Main error type for broker operations
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("WRONGTYPE key holds a value of another kind: {0}")]
    WrongType(String),

    #[error("Partition strategy not defined: {0}")]
    UnknownStrategy(String),

    #[error("Concurrency limiter not defined: {0}")]
    UnknownLimiter(String),

    #[error("Queue broker is disabled")]
    Disabled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid IP address or CIDR range: {0}")]
    InvalidIpRule(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Metrics encoding error: {0}")]
    Metrics(String),
}

impl BrokerError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::WrongType(_) | Self::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UnknownStrategy(_) | Self::UnknownLimiter(_) | Self::InvalidIpRule(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Disabled => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidRequest(_) | Self::Serialization(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<prometheus::Error> for BrokerError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}

/// Implement IntoResponse for Axum integration
impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            BrokerError::WrongType("k".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            BrokerError::UnknownStrategy("smartest".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            BrokerError::Disabled.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            BrokerError::InvalidRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_error_display() {
        let err = BrokerError::UnknownLimiter("turbo".to_string());
        assert_eq!(err.to_string(), "Concurrency limiter not defined: turbo");

        let err = BrokerError::WrongType("balanced-queue:rr-state:default".to_string());
        assert!(err.to_string().starts_with("WRONGTYPE"));
    }

    #[test]
    fn test_error_into_response() {
        let err = BrokerError::Disabled;
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
