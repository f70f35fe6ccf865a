//! The settlement engine facade.
//!
//! Wires the validator, gate, state machine and reaper over one shared store
//! and exposes the operations callers actually invoke: cart validation,
//! checkout, webhook settlement and stale-order reaping. Every entry point
//! checks the permission table first.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::SettlementConfig;
use crate::error::Result;

use super::audit::{AuditSink, SettlementAuditEvent};
use super::authz::{Action, Actor, Authorizer};
use super::capacity::{CapacityValidator, CartLine, CartValidation};
use super::error::SettlementError;
use super::gate::PaymentEventGate;
use super::machine::{SettlementOutcome, SettlementStateMachine};
use super::order::{Order, OrderLine, OrderStatus};
use super::outbox::NotificationOutbox;
use super::payment::PaymentCallback;
use super::reaper::StaleOrderReaper;
use super::store::SettlementStore;

/// A checkout request from the storefront.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub event_id: Uuid,
    pub org_id: Uuid,
    pub buyer_email: String,
    pub currency: String,
    #[serde(default)]
    pub discount_cents: i64,
    pub lines: Vec<CartLine>,
}

/// Result of a checkout attempt.
///
/// When the cart fails validation the order is absent and `validation`
/// carries the per-line reason codes for the storefront to render.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order: Option<Order>,
    pub validation: CartValidation,
}

/// Facade over the settlement subsystem.
pub struct SettlementEngine<S, N, A>
where
    S: SettlementStore + Clone,
    N: NotificationOutbox,
    A: AuditSink,
{
    store: S,
    audit: Arc<A>,
    authorizer: Authorizer,
    config: SettlementConfig,
    validator: CapacityValidator<S>,
    gate: PaymentEventGate<S>,
    machine: SettlementStateMachine<S, N, A>,
    reaper: StaleOrderReaper<S, A>,
}

impl<S, N, A> SettlementEngine<S, N, A>
where
    S: SettlementStore + Clone,
    N: NotificationOutbox,
    A: AuditSink,
{
    /// Assemble the engine from its shared collaborators.
    #[must_use]
    pub fn new(store: S, outbox: Arc<N>, audit: Arc<A>, config: SettlementConfig) -> Self {
        let validator = CapacityValidator::new(store.clone());
        let gate = PaymentEventGate::new(store.clone());
        let machine = SettlementStateMachine::new(store.clone(), outbox, audit.clone())
            .with_confirmation_template(config.confirmation_template.as_str());
        let reaper = StaleOrderReaper::new(store.clone(), audit.clone());
        Self {
            store,
            audit,
            authorizer: Authorizer::new(),
            config,
            validator,
            gate,
            machine,
            reaper,
        }
    }

    /// Validate a cart without creating anything.
    ///
    /// # Errors
    /// Authorization denial, malformed cart lines, or store failure.
    pub async fn validate_cart(
        &self,
        actor: &Actor,
        event_id: Uuid,
        org_id: Uuid,
        lines: &[CartLine],
    ) -> Result<CartValidation> {
        self.authorizer
            .require(actor, Action::ValidateCart, org_id)?;
        self.validator.validate(event_id, lines).await
    }

    /// Validate a cart and, when it passes, create a pending order holding
    /// its capacity.
    ///
    /// Prices on the created lines are the ones captured during validation;
    /// the storefront's quoted totals cannot drift from what gets charged.
    ///
    /// # Errors
    /// Authorization denial, an empty or malformed cart, or store failure.
    /// A cart rejected on capacity or sales-window grounds is NOT an error;
    /// the outcome carries the reason codes instead.
    pub async fn checkout(&self, actor: &Actor, request: CheckoutRequest) -> Result<CheckoutOutcome> {
        self.authorizer
            .require(actor, Action::CreateOrder, request.org_id)?;

        if request.lines.is_empty() {
            return Err(SettlementError::InvalidOrder {
                reason: "cart is empty".to_string(),
            }
            .into());
        }

        let validation = self.validator.validate(request.event_id, &request.lines).await?;
        if !validation.valid {
            return Ok(CheckoutOutcome {
                order: None,
                validation,
            });
        }

        let order = Order::new(
            request.event_id,
            request.org_id,
            &request.buyer_email,
            &request.currency,
            validation.total_cents,
            request.discount_cents,
        )?;

        let mut order_lines = Vec::with_capacity(validation.lines.len());
        for line in &validation.lines {
            let unit = self
                .store
                .get_unit(line.unit_id)
                .await?
                .ok_or(SettlementError::UnitNotFound {
                    unit_id: line.unit_id,
                })?;
            let unit_price = line.unit_price_cents.ok_or_else(|| {
                SettlementError::internal("accepted line missing captured price")
            })?;
            order_lines.push(OrderLine::new(
                order.id,
                line.unit_id,
                line.variant_id,
                unit.kind,
                line.quantity,
                unit_price,
            )?);
        }

        self.store.create_order(&order, &order_lines).await?;
        self.audit
            .record(
                order.org_id,
                SettlementAuditEvent::OrderCreated {
                    order_id: order.id,
                    event_id: order.event_id,
                    total_cents: order.total_cents,
                },
            )
            .await;
        tracing::info!(
            target: "turnstile::settlement::engine",
            order_id = %order.id,
            event_id = %order.event_id,
            total_cents = order.total_cents,
            "Pending order created"
        );

        Ok(CheckoutOutcome {
            order: Some(order),
            validation,
        })
    }

    /// Settle a verified provider callback.
    ///
    /// The gate drops redeliveries before they reach the state machine;
    /// duplicates settle as successful no-op outcomes so the provider stops
    /// retrying.
    ///
    /// # Errors
    /// Authorization denial, unknown order, or store failure.
    pub async fn handle_webhook(
        &self,
        actor: &Actor,
        callback: &PaymentCallback,
    ) -> Result<SettlementOutcome> {
        self.authorizer
            .require(actor, Action::SettlePayment, Uuid::nil())?;

        let payload = serde_json::to_value(callback)
            .map_err(|e| SettlementError::internal(format!("callback serialization: {e}")))?;
        let admission = self
            .gate
            .admit(&self.config.provider, &callback.provider_event_id, payload)
            .await?;

        if !admission.admitted {
            let order = self.store.get_order(callback.order_id).await?;
            if let Some(order) = &order {
                self.audit
                    .record(
                        order.org_id,
                        SettlementAuditEvent::WebhookDuplicate {
                            provider: self.config.provider.clone(),
                            provider_event_id: callback.provider_event_id.clone(),
                        },
                    )
                    .await;
            }
            // Report the settled state so the provider's retry loop sees the
            // same answer the original delivery produced
            let message = match order.map(|o| o.status) {
                Some(OrderStatus::Paid) => "Order already paid".to_string(),
                Some(status) => format!("Duplicate event ignored; order is {}", status),
                None => "Duplicate event ignored".to_string(),
            };
            return Ok(SettlementOutcome {
                paid: false,
                overbooked: false,
                tickets_issued: 0,
                message,
            });
        }

        self.machine.handle(&self.config.provider, callback).await
    }

    /// Cancel pending orders older than the configured maximum age.
    ///
    /// # Errors
    /// Authorization denial or store failure.
    pub async fn reap_stale_orders(&self, actor: &Actor) -> Result<u32> {
        self.authorizer
            .require(actor, Action::ReapStaleOrders, Uuid::nil())?;
        self.reaper
            .reap(Duration::minutes(i64::from(
                self.config.stale_order_max_age_minutes,
            )))
            .await
    }

    /// Fetch an order with its status, for polling after checkout.
    ///
    /// # Errors
    /// Unknown order or store failure.
    pub async fn order_status(&self, order_id: Uuid) -> Result<OrderStatus> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound { order_id })?;
        Ok(order.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::audit::test::CapturingAuditSink;
    use crate::settlement::inventory::SellableUnit;
    use crate::settlement::outbox::InMemoryOutbox;
    use crate::settlement::store::test::InMemorySettlementStore;

    struct Fixture {
        store: InMemorySettlementStore,
        outbox: Arc<InMemoryOutbox>,
        audit: Arc<CapturingAuditSink>,
        engine: SettlementEngine<InMemorySettlementStore, InMemoryOutbox, CapturingAuditSink>,
        event_id: Uuid,
        org_id: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            let store = InMemorySettlementStore::new();
            let outbox = Arc::new(InMemoryOutbox::new());
            let audit = Arc::new(CapturingAuditSink::new());
            let engine = SettlementEngine::new(
                store.clone(),
                outbox.clone(),
                audit.clone(),
                SettlementConfig::default(),
            );
            Self {
                store,
                outbox,
                audit,
                engine,
                event_id: Uuid::new_v4(),
                org_id: Uuid::new_v4(),
            }
        }

        async fn ticket_unit(&self, capacity: Option<u32>) -> SellableUnit {
            let mut unit =
                SellableUnit::ticket_type(self.event_id, self.org_id, "Standard", 2500);
            unit.capacity = capacity;
            self.store.insert_unit(&unit).await.unwrap();
            unit
        }

        fn request(&self, lines: Vec<CartLine>) -> CheckoutRequest {
            CheckoutRequest {
                event_id: self.event_id,
                org_id: self.org_id,
                buyer_email: "buyer@example.com".to_string(),
                currency: "EUR".to_string(),
                discount_cents: 0,
                lines,
            }
        }

        fn callback(&self, order_id: Uuid, event_id: &str, status: &str) -> PaymentCallback {
            PaymentCallback {
                order_id,
                provider_event_id: event_id.to_string(),
                provider_payment_id: "tr_1".to_string(),
                status: status.to_string(),
                amount_cents: 5000,
                currency: "EUR".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn test_checkout_creates_pending_order_with_captured_prices() {
        let fx = Fixture::new();
        let unit = fx.ticket_unit(Some(10)).await;

        let outcome = fx
            .engine
            .checkout(
                &Actor::Shopper,
                fx.request(vec![CartLine {
                    unit_id: unit.id,
                    variant_id: None,
                    quantity: 2,
                }]),
            )
            .await
            .unwrap();

        let order = outcome.order.expect("order created");
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_cents, 5000);

        let lines = fx.store.order_lines(order.id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].unit_price_cents, 2500);
        assert_eq!(lines[0].line_total_cents, 5000);
        assert_eq!(fx.audit.kinds().await, vec!["order_created"]);
    }

    #[tokio::test]
    async fn test_checkout_rejected_cart_creates_nothing() {
        let fx = Fixture::new();
        let unit = fx.ticket_unit(Some(1)).await;

        let outcome = fx
            .engine
            .checkout(
                &Actor::Shopper,
                fx.request(vec![CartLine {
                    unit_id: unit.id,
                    variant_id: None,
                    quantity: 5,
                }]),
            )
            .await
            .unwrap();

        assert!(outcome.order.is_none());
        assert!(!outcome.validation.valid);
        assert!(fx.audit.kinds().await.is_empty());
    }

    #[tokio::test]
    async fn test_checkout_empty_cart_is_an_error() {
        let fx = Fixture::new();
        let err = fx
            .engine
            .checkout(&Actor::Shopper, fx.request(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }

    #[tokio::test]
    async fn test_webhook_settles_and_replay_is_dropped_at_gate() {
        let fx = Fixture::new();
        let unit = fx.ticket_unit(Some(10)).await;

        let order = fx
            .engine
            .checkout(
                &Actor::Shopper,
                fx.request(vec![CartLine {
                    unit_id: unit.id,
                    variant_id: None,
                    quantity: 2,
                }]),
            )
            .await
            .unwrap()
            .order
            .unwrap();

        let first = fx
            .engine
            .handle_webhook(
                &Actor::PaymentProvider,
                &fx.callback(order.id, "evt_1", "paid"),
            )
            .await
            .unwrap();
        assert!(first.paid);
        assert_eq!(first.tickets_issued, 2);

        // Same provider event id redelivered
        let replay = fx
            .engine
            .handle_webhook(
                &Actor::PaymentProvider,
                &fx.callback(order.id, "evt_1", "paid"),
            )
            .await
            .unwrap();
        assert!(!replay.paid);
        assert_eq!(replay.tickets_issued, 0);
        assert_eq!(replay.message, "Order already paid");

        assert_eq!(fx.store.tickets_for_order(order.id).await.unwrap().len(), 2);
        assert_eq!(fx.outbox.len(), 1);
        assert!(fx.audit.kinds().await.contains(&"webhook_duplicate"));
    }

    #[tokio::test]
    async fn test_shopper_cannot_settle_webhooks() {
        let fx = Fixture::new();
        let err = fx
            .engine
            .handle_webhook(
                &Actor::Shopper,
                &fx.callback(Uuid::new_v4(), "evt_1", "paid"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }

    #[tokio::test]
    async fn test_scheduler_reaps_via_engine() {
        let fx = Fixture::new();
        let unit = fx.ticket_unit(Some(10)).await;

        let order = fx
            .engine
            .checkout(
                &Actor::Shopper,
                fx.request(vec![CartLine {
                    unit_id: unit.id,
                    variant_id: None,
                    quantity: 4,
                }]),
            )
            .await
            .unwrap()
            .order
            .unwrap();
        fx.store.backdate_order(order.id, chrono::Duration::hours(2)).await;

        assert_eq!(
            fx.engine.reap_stale_orders(&Actor::Scheduler).await.unwrap(),
            1
        );
        assert_eq!(
            fx.engine.order_status(order.id).await.unwrap(),
            OrderStatus::Cancelled
        );

        // Shopper may not trigger the reaper
        assert!(fx.engine.reap_stale_orders(&Actor::Shopper).await.is_err());
    }

    #[tokio::test]
    async fn test_organizer_checkout_scoped_to_own_org() {
        let fx = Fixture::new();
        let unit = fx.ticket_unit(Some(10)).await;

        let foreign = Actor::Organizer {
            role: crate::settlement::authz::Role::Admin,
            org_id: Uuid::new_v4(),
        };
        let err = fx
            .engine
            .checkout(
                &foreign,
                fx.request(vec![CartLine {
                    unit_id: unit.id,
                    variant_id: None,
                    quantity: 1,
                }]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }
}
