//! Settlement-specific error types.
//!
//! Capacity and validation failures are returned as structured results, never
//! through this enum; these variants cover the genuinely exceptional
//! conditions where the whole operation must fail and roll back.

use std::fmt;

use uuid::Uuid;

/// Settlement-specific errors.
///
/// These provide more context than generic errors and convert to
/// [`TurnstileError`](crate::error::TurnstileError) at service boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// The order does not exist.
    OrderNotFound { order_id: Uuid },
    /// The sellable unit does not exist.
    UnitNotFound { unit_id: Uuid },
    /// Order or line construction violated an invariant.
    InvalidOrder { reason: String },
    /// The actor is not allowed to perform the action.
    NotAuthorized { actor: String, action: String },
    /// Webhook signature is invalid.
    InvalidWebhookSignature,
    /// Webhook timestamp is too old (replay protection).
    WebhookTimestampExpired { age_seconds: i64 },
    /// Webhook body is malformed.
    InvalidWebhookPayload { message: String },
    /// The backing store failed.
    Store { message: String },
    /// An unexpected internal error occurred.
    Internal { message: String },
}

impl fmt::Display for SettlementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrderNotFound { order_id } => {
                write!(f, "Order not found: {}", order_id)
            }
            Self::UnitNotFound { unit_id } => {
                write!(f, "Sellable unit not found: {}", unit_id)
            }
            Self::InvalidOrder { reason } => {
                write!(f, "Invalid order: {}", reason)
            }
            Self::NotAuthorized { actor, action } => {
                write!(f, "Actor '{}' may not perform '{}'", actor, action)
            }
            Self::InvalidWebhookSignature => {
                write!(f, "Invalid webhook signature")
            }
            Self::WebhookTimestampExpired { age_seconds } => {
                write!(f, "Webhook timestamp expired ({} seconds old)", age_seconds)
            }
            Self::InvalidWebhookPayload { message } => {
                write!(f, "Invalid webhook payload: {}", message)
            }
            Self::Store { message } => {
                write!(f, "Store error: {}", message)
            }
            Self::Internal { message } => {
                write!(f, "Internal settlement error: {}", message)
            }
        }
    }
}

impl std::error::Error for SettlementError {}

impl From<SettlementError> for crate::error::TurnstileError {
    fn from(err: SettlementError) -> Self {
        match &err {
            SettlementError::OrderNotFound { .. } | SettlementError::UnitNotFound { .. } => {
                crate::error::TurnstileError::NotFound(err.to_string())
            }

            SettlementError::InvalidOrder { .. }
            | SettlementError::InvalidWebhookSignature
            | SettlementError::WebhookTimestampExpired { .. }
            | SettlementError::InvalidWebhookPayload { .. } => {
                crate::error::TurnstileError::BadRequest(err.to_string())
            }

            SettlementError::NotAuthorized { .. } => {
                crate::error::TurnstileError::Forbidden(err.to_string())
            }

            SettlementError::Store { .. } => {
                crate::error::TurnstileError::ServiceUnavailable(err.to_string())
            }

            SettlementError::Internal { .. } => {
                crate::error::TurnstileError::Internal(err.to_string())
            }
        }
    }
}

impl SettlementError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this is a client error (caller mistake).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::OrderNotFound { .. }
                | Self::UnitNotFound { .. }
                | Self::InvalidOrder { .. }
                | Self::NotAuthorized { .. }
                | Self::InvalidWebhookSignature
                | Self::WebhookTimestampExpired { .. }
                | Self::InvalidWebhookPayload { .. }
        )
    }

    /// Check if this is a server error.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Internal { .. })
    }

    /// Check if retrying the operation can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = Uuid::nil();
        let err = SettlementError::OrderNotFound { order_id: id };
        assert_eq!(
            err.to_string(),
            format!("Order not found: {}", id)
        );

        let err = SettlementError::NotAuthorized {
            actor: "shopper".to_string(),
            action: "reap_stale_orders".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Actor 'shopper' may not perform 'reap_stale_orders'"
        );
    }

    #[test]
    fn test_error_classification() {
        let err = SettlementError::OrderNotFound {
            order_id: Uuid::nil(),
        };
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
        assert!(!err.is_retryable());

        let err = SettlementError::store("connection refused");
        assert!(!err.is_client_error());
        assert!(err.is_server_error());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_convert_to_turnstile_error() {
        use crate::error::TurnstileError;

        let err = SettlementError::OrderNotFound {
            order_id: Uuid::nil(),
        };
        let converted: TurnstileError = err.into();
        assert!(matches!(converted, TurnstileError::NotFound(_)));

        let err = SettlementError::NotAuthorized {
            actor: "shopper".to_string(),
            action: "settle_payment".to_string(),
        };
        let converted: TurnstileError = err.into();
        assert!(matches!(converted, TurnstileError::Forbidden(_)));

        let err = SettlementError::InvalidWebhookSignature;
        let converted: TurnstileError = err.into();
        assert!(matches!(converted, TurnstileError::BadRequest(_)));

        let err = SettlementError::store("down");
        let converted: TurnstileError = err.into();
        assert!(matches!(converted, TurnstileError::ServiceUnavailable(_)));
    }
}
