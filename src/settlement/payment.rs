//! Payment records and provider callbacks.
//!
//! A [`PaymentEvent`] is one raw, append-only notification from the provider
//! and is the unit of webhook deduplication. A [`Payment`] is the provider-side
//! charge record, updated in place as its status advances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local mirror of the provider's payment status vocabulary.
///
/// Unrecognized provider strings fall back to [`PaymentStatus::Open`] so an
/// unknown future status never breaks the callback pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Open,
    Paid,
    Failed,
    Expired,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    /// Map a provider status string into the closed local enum.
    #[must_use]
    pub fn from_provider(status: &str) -> Self {
        match status {
            "paid" => Self::Paid,
            "failed" => Self::Failed,
            "expired" => Self::Expired,
            "canceled" | "cancelled" => Self::Cancelled,
            "refunded" | "charged_back" => Self::Refunded,
            // "open", "pending", "authorized" and anything unknown
            _ => Self::Open,
        }
    }

    /// Whether this status terminally fails the payment attempt.
    #[must_use]
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Expired | Self::Cancelled)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provider-side charge record, unique on (provider, provider_payment_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub provider: String,
    pub provider_payment_id: String,
    pub order_id: Uuid,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

/// One raw inbound provider notification, unique on (provider, provider_event_id).
///
/// Append-only; this uniqueness is the exactly-once gate for webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub provider: String,
    pub provider_event_id: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl PaymentEvent {
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        provider_event_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            provider: provider.into(),
            provider_event_id: provider_event_id.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Parsed payment webhook body.
///
/// Safe to deliver an unbounded number of times with identical content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCallback {
    pub order_id: Uuid,
    pub provider_event_id: String,
    pub provider_payment_id: String,
    /// Raw provider status string; mapped via [`PaymentStatus::from_provider`].
    pub status: String,
    pub amount_cents: i64,
    pub currency: String,
}
