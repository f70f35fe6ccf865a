//! The settlement state machine.
//!
//! Consumes provider payment callbacks and transitions Order and Payment
//! state. On a terminal "paid" it re-validates capacity under lock and issues
//! tickets; on terminal failure it closes the order, which releases its held
//! capacity through the derived-demand computation. Terminal states are
//! sinks: providers redeliver, so replays produce idempotent outcomes, never
//! errors.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;

use super::audit::{AuditSink, SettlementAuditEvent};
use super::error::SettlementError;
use super::inventory::UnitKind;
use super::issuer::TicketIssuer;
use super::order::{Order, OrderStatus};
use super::outbox::NotificationOutbox;
use super::payment::{Payment, PaymentCallback, PaymentStatus};
use super::store::SettlementStore;

/// Result of processing one payment callback.
///
/// Every field is safe to hand back to the provider verbatim; duplicate and
/// out-of-order deliveries produce success outcomes so retries stop.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementOutcome {
    /// True only when this call transitioned the order to paid.
    pub paid: bool,
    /// True when the overbooking failsafe cancelled the order; the charge
    /// must be refunded out of band.
    pub overbooked: bool,
    /// Tickets created by this call (0 on replays).
    pub tickets_issued: u32,
    pub message: String,
}

impl SettlementOutcome {
    fn ack(message: impl Into<String>) -> Self {
        Self {
            paid: false,
            overbooked: false,
            tickets_issued: 0,
            message: message.into(),
        }
    }
}

/// Transitions orders through their lifecycle on provider callbacks.
pub struct SettlementStateMachine<S, N, A>
where
    S: SettlementStore + Clone,
    N: NotificationOutbox,
    A: AuditSink,
{
    store: S,
    issuer: TicketIssuer<S>,
    outbox: Arc<N>,
    audit: Arc<A>,
    confirmation_template: String,
}

impl<S, N, A> SettlementStateMachine<S, N, A>
where
    S: SettlementStore + Clone,
    N: NotificationOutbox,
    A: AuditSink,
{
    /// Create a new state machine over a shared store.
    #[must_use]
    pub fn new(store: S, outbox: Arc<N>, audit: Arc<A>) -> Self {
        let issuer = TicketIssuer::new(store.clone());
        Self {
            store,
            issuer,
            outbox,
            audit,
            confirmation_template: "order-confirmation".to_string(),
        }
    }

    /// Override the confirmation notification template key.
    #[must_use]
    pub fn with_confirmation_template(mut self, template: impl Into<String>) -> Self {
        self.confirmation_template = template.into();
        self
    }

    /// Process one provider callback for an order.
    ///
    /// Acquires the exclusive per-order lock first, so a concurrent callback
    /// or reaper pass for the same order serializes behind this one.
    ///
    /// # Errors
    /// Only hard failures (unknown order, unreachable store) are errors;
    /// every domain outcome, including duplicates and the overbooking
    /// failsafe, is a structured [`SettlementOutcome`].
    pub async fn handle(&self, provider: &str, callback: &PaymentCallback) -> Result<SettlementOutcome> {
        let _order_lock = self.store.lock_order(callback.order_id).await?;

        let order = self
            .store
            .get_order(callback.order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound {
                order_id: callback.order_id,
            })?;

        let status = PaymentStatus::from_provider(&callback.status);

        self.store
            .upsert_payment(&Payment {
                provider: provider.to_string(),
                provider_payment_id: callback.provider_payment_id.clone(),
                order_id: callback.order_id,
                status,
                amount_cents: callback.amount_cents,
                currency: callback.currency.clone(),
                updated_at: Utc::now(),
            })
            .await?;

        let outcome = match status {
            PaymentStatus::Paid => self.settle_paid(&order).await?,
            s if s.is_terminal_failure() => self.close_order(&order, s).await?,
            s => SettlementOutcome::ack(format!(
                "Payment status '{}' recorded; no state change",
                s
            )),
        };

        tracing::info!(
            target: "turnstile::settlement::machine",
            order_id = %callback.order_id,
            provider_status = %callback.status,
            paid = outcome.paid,
            overbooked = outcome.overbooked,
            tickets_issued = outcome.tickets_issued,
            "Callback settled"
        );

        Ok(outcome)
    }

    /// The paid path: authoritative capacity re-check, ticket issuance, one
    /// order-level confirmation.
    async fn settle_paid(&self, order: &Order) -> Result<SettlementOutcome> {
        match order.status {
            OrderStatus::Paid => return Ok(SettlementOutcome::ack("Order already paid")),
            OrderStatus::Pending => {}
            terminal => {
                return Ok(SettlementOutcome::ack(format!(
                    "Order already {}; paid callback ignored",
                    terminal
                )))
            }
        }

        let lines = self.store.order_lines(order.id).await?;
        let ticket_lines: Vec<_> = lines
            .iter()
            .filter(|l| l.kind == UnitKind::TicketType)
            .collect();

        // Hold every ticket unit's lock across the paid flip and the
        // authoritative re-check; a competing settlement serializes here.
        let unit_ids: Vec<Uuid> = ticket_lines.iter().map(|l| l.unit_id).collect();
        let _locks = if unit_ids.is_empty() {
            None
        } else {
            Some(self.store.lock_units_blocking(&unit_ids).await?)
        };

        self.store
            .set_order_status(order.id, OrderStatus::Paid)
            .await?;

        // Authoritative re-check: the checkout-time validation was advisory
        // and time has passed since. Only paid demand counts here; this
        // order was flipped first, so its own quantities are included.
        if let Some(oversold_unit) = self.find_oversold_unit(&ticket_lines).await? {
            self.store
                .set_order_status(order.id, OrderStatus::Cancelled)
                .await?;
            self.audit
                .record(
                    order.org_id,
                    SettlementAuditEvent::OverbookingTriggered {
                        order_id: order.id,
                        unit_id: oversold_unit,
                    },
                )
                .await;
            tracing::warn!(
                target: "turnstile::settlement::machine",
                order_id = %order.id,
                unit_id = %oversold_unit,
                "Overbooking failsafe: order cancelled at settlement"
            );
            return Ok(SettlementOutcome {
                paid: false,
                overbooked: true,
                tickets_issued: 0,
                message: "Insufficient capacity at settlement; order cancelled, refund required"
                    .to_string(),
            });
        }

        let mut tickets_issued = 0;
        for line in ticket_lines.iter().copied() {
            tickets_issued += self.issuer.issue(line, order.event_id).await?;
        }

        // One confirmation per order, not per line; the key makes replayed
        // paid callbacks unable to enqueue a second copy.
        self.outbox
            .enqueue(
                order.org_id,
                &order.buyer_email,
                &self.confirmation_template,
                serde_json::json!({
                    "order_id": order.id,
                    "event_id": order.event_id,
                    "total_cents": order.total_cents,
                    "currency": order.currency,
                }),
                &format!("order-confirmation:{}", order.id),
            )
            .await?;

        self.audit
            .record(
                order.org_id,
                SettlementAuditEvent::OrderPaid {
                    order_id: order.id,
                    tickets_issued,
                },
            )
            .await;

        Ok(SettlementOutcome {
            paid: true,
            overbooked: false,
            tickets_issued,
            message: "Order paid".to_string(),
        })
    }

    /// Returns the first unit whose paid demand now exceeds its capacity.
    ///
    /// Must be called with the units' locks held and the order already
    /// flipped to paid.
    async fn find_oversold_unit(
        &self,
        ticket_lines: &[&super::order::OrderLine],
    ) -> Result<Option<Uuid>> {
        let mut checked = std::collections::HashSet::new();
        for line in ticket_lines {
            if !checked.insert(line.unit_id) {
                continue;
            }
            let unit = match self.store.get_unit(line.unit_id).await? {
                Some(unit) => unit,
                None => continue,
            };
            if let Some(capacity) = unit.capacity {
                if self.store.settled_demand(line.unit_id, None).await? > capacity {
                    return Ok(Some(line.unit_id));
                }
            }
        }

        Ok(None)
    }

    /// Terminal failure path: close a still-pending order. The derived
    /// demand computation stops counting it the moment the status flips, so
    /// no explicit inventory release exists.
    async fn close_order(
        &self,
        order: &Order,
        status: PaymentStatus,
    ) -> Result<SettlementOutcome> {
        if order.status != OrderStatus::Pending {
            return Ok(SettlementOutcome::ack(format!(
                "Order already {}; '{}' callback ignored",
                order.status, status
            )));
        }

        let new_status = match status {
            PaymentStatus::Failed => OrderStatus::Failed,
            _ => OrderStatus::Cancelled,
        };

        self.store.set_order_status(order.id, new_status).await?;
        self.audit
            .record(
                order.org_id,
                SettlementAuditEvent::OrderClosed {
                    order_id: order.id,
                    status: new_status.as_str().to_string(),
                },
            )
            .await;

        Ok(SettlementOutcome::ack(format!(
            "Order marked {}",
            new_status
        )))
    }
}
