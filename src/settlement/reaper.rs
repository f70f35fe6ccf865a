//! Background reaping of abandoned pending orders.
//!
//! A pending order holds capacity through the derived-demand computation.
//! Buyers who abandon checkout would hold that capacity forever, so a
//! scheduler periodically cancels pending orders older than a configured
//! age. Each order is re-checked under its exclusive lock, so a payment
//! callback racing the reaper wins or loses cleanly, never both.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::error::Result;

use super::audit::{AuditSink, SettlementAuditEvent};
use super::order::OrderStatus;
use super::store::SettlementStore;

/// Cancels stale pending orders to release their held capacity.
pub struct StaleOrderReaper<S, A>
where
    S: SettlementStore,
    A: AuditSink,
{
    store: S,
    audit: Arc<A>,
}

impl<S, A> StaleOrderReaper<S, A>
where
    S: SettlementStore,
    A: AuditSink,
{
    /// Create a new reaper over a shared store.
    #[must_use]
    pub fn new(store: S, audit: Arc<A>) -> Self {
        Self { store, audit }
    }

    /// Cancel every pending order created more than `max_age` ago.
    ///
    /// Returns the number of orders cancelled by this pass. Orders that
    /// settle between the candidate scan and the per-order re-check are
    /// skipped, not errors.
    pub async fn reap(&self, max_age: Duration) -> Result<u32> {
        let cutoff = Utc::now() - max_age;
        let candidates = self.store.stale_pending_orders(cutoff).await?;

        let mut reaped = 0;
        for order_id in candidates {
            let _order_lock = self.store.lock_order(order_id).await?;

            // Re-fetch under the lock: a paid callback may have settled the
            // order since the scan.
            let order = match self.store.get_order(order_id).await? {
                Some(order) => order,
                None => continue,
            };
            if order.status != OrderStatus::Pending || order.created_at > cutoff {
                continue;
            }

            self.store
                .set_order_status(order_id, OrderStatus::Cancelled)
                .await?;
            self.audit
                .record(order.org_id, SettlementAuditEvent::StaleOrderReaped { order_id })
                .await;
            reaped += 1;
        }

        if reaped > 0 {
            tracing::info!(
                target: "turnstile::settlement::reaper",
                reaped,
                "Stale pending orders cancelled"
            );
        }

        Ok(reaped)
    }
}
