//! Audit logging for settlement operations.
//!
//! The settlement machine records audit events explicitly as post-decision
//! hooks, keeping side effects visible in one place and testable without a
//! live database. Recording is best-effort: a sink failure is logged and
//! never propagated into the settlement result.

use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

/// Audit event types for settlement operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementAuditEvent {
    /// A pending order was created from an accepted cart.
    OrderCreated {
        order_id: Uuid,
        event_id: Uuid,
        total_cents: i64,
    },
    /// An order settled as paid and tickets were issued.
    OrderPaid {
        order_id: Uuid,
        tickets_issued: u32,
    },
    /// The overbooking failsafe cancelled an order at settlement time.
    OverbookingTriggered {
        order_id: Uuid,
        unit_id: Uuid,
    },
    /// A pending order was marked failed or cancelled by a provider callback.
    OrderClosed {
        order_id: Uuid,
        status: String,
    },
    /// A duplicate provider notification was dropped at the gate.
    WebhookDuplicate {
        provider: String,
        provider_event_id: String,
    },
    /// The reaper cancelled an abandoned pending order.
    StaleOrderReaped {
        order_id: Uuid,
    },
}

impl fmt::Display for SettlementAuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrderCreated {
                order_id,
                event_id,
                total_cents,
            } => {
                write!(
                    f,
                    "Order created: order={}, event={}, total_cents={}",
                    order_id, event_id, total_cents
                )
            }
            Self::OrderPaid {
                order_id,
                tickets_issued,
            } => {
                write!(
                    f,
                    "Order paid: order={}, tickets_issued={}",
                    order_id, tickets_issued
                )
            }
            Self::OverbookingTriggered { order_id, unit_id } => {
                write!(
                    f,
                    "Overbooking failsafe: order={}, unit={}",
                    order_id, unit_id
                )
            }
            Self::OrderClosed { order_id, status } => {
                write!(f, "Order closed: order={}, status={}", order_id, status)
            }
            Self::WebhookDuplicate {
                provider,
                provider_event_id,
            } => {
                write!(
                    f,
                    "Duplicate webhook: provider={}, event={}",
                    provider, provider_event_id
                )
            }
            Self::StaleOrderReaped { order_id } => {
                write!(f, "Stale order reaped: order={}", order_id)
            }
        }
    }
}

impl SettlementAuditEvent {
    /// Stable event kind for structured logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => "order_created",
            Self::OrderPaid { .. } => "order_paid",
            Self::OverbookingTriggered { .. } => "overbooking_triggered",
            Self::OrderClosed { .. } => "order_closed",
            Self::WebhookDuplicate { .. } => "webhook_duplicate",
            Self::StaleOrderReaped { .. } => "stale_order_reaped",
        }
    }
}

/// Trait for audit sinks.
///
/// Implementations should handle failures internally; the settlement
/// transaction's success never depends on the sink.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one audit event for an organization.
    async fn record(&self, org_id: Uuid, event: SettlementAuditEvent);
}

/// Audit sink that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAuditSink;

#[async_trait]
impl AuditSink for NoOpAuditSink {
    async fn record(&self, _org_id: Uuid, _event: SettlementAuditEvent) {
        // No-op
    }
}

/// Audit sink that logs through `tracing` at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, org_id: Uuid, event: SettlementAuditEvent) {
        tracing::info!(
            target: "turnstile::settlement::audit",
            org_id = %org_id,
            event_kind = %event.kind(),
            "{}", event
        );
    }
}

/// Capturing audit sink for tests.
#[cfg(any(test, feature = "test-store"))]
pub mod test {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Audit sink that captures events for assertions.
    #[derive(Default, Clone)]
    pub struct CapturingAuditSink {
        events: Arc<Mutex<Vec<(Uuid, SettlementAuditEvent)>>>,
    }

    impl CapturingAuditSink {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn events(&self) -> Vec<(Uuid, SettlementAuditEvent)> {
            self.events.lock().await.clone()
        }

        /// Kinds of all captured events, in order.
        pub async fn kinds(&self) -> Vec<&'static str> {
            self.events
                .lock()
                .await
                .iter()
                .map(|(_, e)| e.kind())
                .collect()
        }
    }

    #[async_trait]
    impl AuditSink for CapturingAuditSink {
        async fn record(&self, org_id: Uuid, event: SettlementAuditEvent) {
            self.events.lock().await.push((org_id, event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::CapturingAuditSink;
    use super::*;

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpAuditSink;
        sink.record(
            Uuid::new_v4(),
            SettlementAuditEvent::StaleOrderReaped {
                order_id: Uuid::new_v4(),
            },
        )
        .await;
        // Just verifies it doesn't panic
    }

    #[tokio::test]
    async fn test_capturing_sink() {
        let sink = CapturingAuditSink::new();
        let org_id = Uuid::new_v4();

        sink.record(
            org_id,
            SettlementAuditEvent::OrderPaid {
                order_id: Uuid::new_v4(),
                tickets_issued: 4,
            },
        )
        .await;
        sink.record(
            org_id,
            SettlementAuditEvent::OverbookingTriggered {
                order_id: Uuid::new_v4(),
                unit_id: Uuid::new_v4(),
            },
        )
        .await;

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, org_id);
        assert_eq!(
            sink.kinds().await,
            vec!["order_paid", "overbooking_triggered"]
        );
    }

    #[test]
    fn test_event_display_and_kind() {
        let order_id = Uuid::new_v4();
        let event = SettlementAuditEvent::OrderPaid {
            order_id,
            tickets_issued: 6,
        };
        assert_eq!(event.kind(), "order_paid");
        let display = event.to_string();
        assert!(display.contains(&order_id.to_string()));
        assert!(display.contains('6'));
    }
}
