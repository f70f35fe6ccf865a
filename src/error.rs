use serde::Serialize;

/// The main error type for Turnstile.
///
/// Domain-specific settlement errors ([`crate::settlement::SettlementError`])
/// convert into this type for surfacing at service boundaries.
#[derive(Debug, thiserror::Error)]
pub enum TurnstileError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl TurnstileError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code for API consumers.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Internal(_) | Self::Anyhow(_) => "internal",
        }
    }

    /// Serializable response body for HTTP layers built on top of the engine.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code().to_string(),
            error: self.to_string(),
        }
    }
}

/// Standard error response format.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub error: String,
}

/// Convenience Result type for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TurnstileError::not_found("x").code(), "not_found");
        assert_eq!(TurnstileError::conflict("x").code(), "conflict");
        assert_eq!(TurnstileError::internal("x").code(), "internal");
    }

    #[test]
    fn test_error_response() {
        let resp = TurnstileError::bad_request("quantity must be positive").to_response();
        assert_eq!(resp.code, "bad_request");
        assert!(resp.error.contains("quantity must be positive"));
    }

    #[test]
    fn test_display() {
        let err = TurnstileError::not_found("order 42");
        assert_eq!(err.to_string(), "Not found: order 42");
    }
}
