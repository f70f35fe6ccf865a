//! Exactly-once admission control for inbound payment notifications.
//!
//! Payment providers deliver webhooks at-least-once: retries, duplicates and
//! reordering are all normal. The gate deduplicates on
//! (provider, provider_event_id) with a single atomic insert-if-absent, the
//! sole defense between provider redelivery and the settlement machine.

use serde::Serialize;

use crate::error::Result;

use super::payment::PaymentEvent;
use super::store::SettlementStore;

/// Outcome of admitting a provider notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    /// True on first delivery; false means a duplicate that must be
    /// acknowledged to the provider without reprocessing.
    pub admitted: bool,
}

/// Deduplicating gate in front of the settlement state machine.
pub struct PaymentEventGate<S: SettlementStore> {
    store: S,
}

impl<S: SettlementStore> PaymentEventGate<S> {
    /// Create a new gate.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Admit a notification, recording it durably in the same atomic
    /// operation as the admission decision.
    ///
    /// Duplicate delivery is not an error: the caller should acknowledge the
    /// provider with success so retries stop.
    pub async fn admit(
        &self,
        provider: &str,
        provider_event_id: &str,
        payload: serde_json::Value,
    ) -> Result<Admission> {
        let event = PaymentEvent::new(provider, provider_event_id, payload);
        let admitted = self.store.record_payment_event(&event).await?;

        if admitted {
            tracing::debug!(
                target: "turnstile::settlement::gate",
                provider,
                provider_event_id,
                "Payment event admitted"
            );
        } else {
            tracing::info!(
                target: "turnstile::settlement::gate",
                provider,
                provider_event_id,
                "Duplicate payment event dropped"
            );
        }

        Ok(Admission { admitted })
    }
}
