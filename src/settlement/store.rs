//! Storage trait for settlement data.
//!
//! Implement [`SettlementStore`] to persist settlement state to your
//! database. An in-memory implementation is provided for testing.
//!
//! # Locking contract
//!
//! Every capacity decision and every settlement transition runs under a
//! row-scoped exclusive lock: skip-locked semantics for sellable units during
//! advisory validation ([`SettlementStore::lock_units`]), blocking locks for
//! units during settlement re-checks and for orders always. Production
//! implementations backed by SQL must provide equivalent semantics
//! (`SELECT ... FOR UPDATE SKIP LOCKED` / `SELECT ... FOR UPDATE`) and may
//! return empty lock sets when the transaction itself carries the locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::error::Result;

use super::inventory::SellableUnit;
use super::issuer::TicketInstance;
use super::order::{Order, OrderLine, OrderStatus};
use super::payment::{Payment, PaymentEvent};

/// Exclusive locks over a set of sellable units.
///
/// Units that could not be acquired under skip-locked semantics are listed as
/// contended; callers must treat those units as transiently unavailable.
/// All locks are released on drop.
pub struct UnitLocks {
    guards: Vec<OwnedMutexGuard<()>>,
    contended: HashSet<Uuid>,
}

impl UnitLocks {
    /// Build a lock set from acquired guards and the ids that were skipped.
    #[must_use]
    pub fn new(guards: Vec<OwnedMutexGuard<()>>, contended: HashSet<Uuid>) -> Self {
        Self { guards, contended }
    }

    /// An empty lock set, for store implementations whose transaction carries
    /// the row locks.
    #[must_use]
    pub fn transaction_scoped() -> Self {
        Self {
            guards: Vec::new(),
            contended: HashSet::new(),
        }
    }

    /// Whether this unit was skipped because another holder had it locked.
    #[must_use]
    pub fn is_contended(&self, unit_id: Uuid) -> bool {
        self.contended.contains(&unit_id)
    }

    /// Number of locks actually held.
    #[must_use]
    pub fn held(&self) -> usize {
        self.guards.len()
    }
}

/// Exclusive lock over one order. Released on drop.
pub struct OrderLock {
    _guard: Option<OwnedMutexGuard<()>>,
}

impl OrderLock {
    #[must_use]
    pub fn new(guard: OwnedMutexGuard<()>) -> Self {
        Self {
            _guard: Some(guard),
        }
    }

    /// For store implementations whose transaction carries the row lock.
    #[must_use]
    pub fn transaction_scoped() -> Self {
        Self { _guard: None }
    }
}

/// Trait for storing settlement data.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    // Inventory

    /// Insert or replace a sellable unit.
    async fn insert_unit(&self, unit: &SellableUnit) -> Result<()>;

    /// Fetch a sellable unit by id.
    async fn get_unit(&self, unit_id: Uuid) -> Result<Option<SellableUnit>>;

    /// Acquire exclusive locks on the given units with skip-locked semantics.
    ///
    /// Ids are deduplicated and locked in sorted order regardless of input
    /// order, so concurrent callers can never deadlock against each other.
    /// Units currently held by another caller are skipped and reported via
    /// [`UnitLocks::is_contended`] instead of queueing indefinitely.
    async fn lock_units(&self, unit_ids: &[Uuid]) -> Result<UnitLocks>;

    /// Acquire exclusive locks on the given units, waiting for contended ones.
    ///
    /// Used at settlement time, where a decision must be reached. The same
    /// sorted-order guarantee as [`SettlementStore::lock_units`] applies.
    async fn lock_units_blocking(&self, unit_ids: &[Uuid]) -> Result<UnitLocks>;

    /// Compute committed demand for a unit: the sum of quantities on order
    /// lines whose order currently holds capacity (pending or paid).
    ///
    /// With `variant_id` set, only lines for that variant count; without it,
    /// all lines for the unit count, variant lines included (a variant
    /// consumes its parent's capacity too). `exclude_order` removes one
    /// order's own lines from the sum, for settlement-time re-checks.
    ///
    /// This is always recomputed from source records, never cached, and must
    /// be called while holding the unit's lock for the count to be
    /// authoritative.
    async fn committed_demand(
        &self,
        unit_id: Uuid,
        variant_id: Option<Uuid>,
        exclude_order: Option<Uuid>,
    ) -> Result<u32>;

    /// Compute settled demand for a unit: the sum of quantities on order
    /// lines whose order is paid. Pending holds are advisory and do not
    /// count here.
    ///
    /// This is the authoritative measure for the settlement-time re-check:
    /// an order that was just marked paid counts toward it, a competitor
    /// still waiting on its own callback does not. Same recompute-under-lock
    /// contract as [`SettlementStore::committed_demand`].
    async fn settled_demand(&self, unit_id: Uuid, variant_id: Option<Uuid>) -> Result<u32>;

    // Orders

    /// Persist a new order together with all of its lines.
    async fn create_order(&self, order: &Order, lines: &[OrderLine]) -> Result<()>;

    /// Fetch an order header by id.
    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>>;

    /// Fetch all lines of an order.
    async fn order_lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>>;

    /// Update an order's status and bump its `updated_at`.
    async fn set_order_status(&self, order_id: Uuid, status: OrderStatus) -> Result<()>;

    /// Acquire the exclusive per-order lock, blocking until available.
    ///
    /// An order is only ever contended by its own webhook and the reaper, a
    /// bounded and rare case, so waiting is acceptable here.
    async fn lock_order(&self, order_id: Uuid) -> Result<OrderLock>;

    /// Ids of pending orders created before the cutoff.
    async fn stale_pending_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>>;

    // Payments

    /// Record a payment event, insert-if-absent on (provider, provider_event_id).
    ///
    /// Returns `true` on first delivery, `false` on a duplicate. The check
    /// and the insert must be one atomic operation; a crash may never leave
    /// the event admitted but unrecorded or recorded but unprocessable by a
    /// retry.
    async fn record_payment_event(&self, event: &PaymentEvent) -> Result<bool>;

    /// Insert or update the charge record keyed (provider, provider_payment_id).
    async fn upsert_payment(&self, payment: &Payment) -> Result<()>;

    /// Fetch a charge record.
    async fn get_payment(&self, provider: &str, provider_payment_id: &str)
        -> Result<Option<Payment>>;

    // Tickets

    /// Insert a ticket instance, insert-if-absent on (order_line_id, sequence).
    ///
    /// Returns `false` when an instance with that key already exists; the
    /// caller must treat that as a successful no-op, never a failure.
    async fn insert_ticket(&self, ticket: &TicketInstance) -> Result<bool>;

    /// All ticket instances for one order line, ordered by sequence.
    async fn tickets_for_line(&self, order_line_id: Uuid) -> Result<Vec<TicketInstance>>;

    /// All ticket instances for one order.
    async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<TicketInstance>>;
}

/// In-memory settlement store for testing.
#[cfg(any(test, feature = "test-store"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, RwLock};

    /// In-memory settlement store.
    ///
    /// Wraps data in Arc for cheap cloning; per-record locks are real
    /// `tokio` mutexes so concurrency tests exercise the same lock protocol
    /// a production store must provide.
    #[derive(Default, Clone)]
    pub struct InMemorySettlementStore {
        inner: Arc<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        units: RwLock<HashMap<Uuid, SellableUnit>>,
        orders: RwLock<HashMap<Uuid, Order>>,
        lines: RwLock<Vec<OrderLine>>,
        payments: RwLock<HashMap<(String, String), Payment>>,
        events: RwLock<HashMap<(String, String), PaymentEvent>>,
        tickets: RwLock<HashMap<(Uuid, u32), TicketInstance>>,
        unit_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
        order_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    }

    impl InMemorySettlementStore {
        /// Create a new in-memory store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// All ticket instances in the store (for assertions).
        pub fn all_tickets(&self) -> Vec<TicketInstance> {
            self.inner.tickets.read().unwrap().values().cloned().collect()
        }

        /// Number of recorded payment events (for assertions).
        pub fn event_count(&self) -> usize {
            self.inner.events.read().unwrap().len()
        }

        /// Shift an order's creation time into the past (for reaper tests).
        pub async fn backdate_order(&self, order_id: Uuid, age: chrono::Duration) {
            let mut orders = self.inner.orders.write().unwrap();
            if let Some(order) = orders.get_mut(&order_id) {
                order.created_at = chrono::Utc::now() - age;
            }
        }

        fn unit_lock_handle(&self, unit_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
            let mut registry = self.inner.unit_locks.lock().unwrap();
            registry.entry(unit_id).or_default().clone()
        }

        fn order_lock_handle(&self, order_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
            let mut registry = self.inner.order_locks.lock().unwrap();
            registry.entry(order_id).or_default().clone()
        }

        fn sorted_unique(unit_ids: &[Uuid]) -> Vec<Uuid> {
            let mut ids: Vec<Uuid> = unit_ids.to_vec();
            ids.sort();
            ids.dedup();
            ids
        }
    }

    #[async_trait]
    impl SettlementStore for InMemorySettlementStore {
        async fn insert_unit(&self, unit: &SellableUnit) -> Result<()> {
            self.inner
                .units
                .write()
                .unwrap()
                .insert(unit.id, unit.clone());
            Ok(())
        }

        async fn get_unit(&self, unit_id: Uuid) -> Result<Option<SellableUnit>> {
            Ok(self.inner.units.read().unwrap().get(&unit_id).cloned())
        }

        async fn lock_units(&self, unit_ids: &[Uuid]) -> Result<UnitLocks> {
            let mut guards = Vec::new();
            let mut contended = HashSet::new();
            for id in Self::sorted_unique(unit_ids) {
                let handle = self.unit_lock_handle(id);
                match handle.try_lock_owned() {
                    Ok(guard) => guards.push(guard),
                    Err(_) => {
                        contended.insert(id);
                    }
                }
            }
            Ok(UnitLocks::new(guards, contended))
        }

        async fn lock_units_blocking(&self, unit_ids: &[Uuid]) -> Result<UnitLocks> {
            let mut guards = Vec::new();
            for id in Self::sorted_unique(unit_ids) {
                let handle = self.unit_lock_handle(id);
                guards.push(handle.lock_owned().await);
            }
            Ok(UnitLocks::new(guards, HashSet::new()))
        }

        async fn committed_demand(
            &self,
            unit_id: Uuid,
            variant_id: Option<Uuid>,
            exclude_order: Option<Uuid>,
        ) -> Result<u32> {
            let orders = self.inner.orders.read().unwrap();
            let lines = self.inner.lines.read().unwrap();

            let demand = lines
                .iter()
                .filter(|line| line.unit_id == unit_id)
                .filter(|line| variant_id.is_none() || line.variant_id == variant_id)
                .filter(|line| Some(line.order_id) != exclude_order)
                .filter(|line| {
                    orders
                        .get(&line.order_id)
                        .map(|o| o.status.holds_capacity())
                        .unwrap_or(false)
                })
                .map(|line| line.quantity)
                .sum();

            Ok(demand)
        }

        async fn settled_demand(&self, unit_id: Uuid, variant_id: Option<Uuid>) -> Result<u32> {
            let orders = self.inner.orders.read().unwrap();
            let lines = self.inner.lines.read().unwrap();

            let demand = lines
                .iter()
                .filter(|line| line.unit_id == unit_id)
                .filter(|line| variant_id.is_none() || line.variant_id == variant_id)
                .filter(|line| {
                    orders
                        .get(&line.order_id)
                        .map(|o| o.status == OrderStatus::Paid)
                        .unwrap_or(false)
                })
                .map(|line| line.quantity)
                .sum();

            Ok(demand)
        }

        async fn create_order(&self, order: &Order, lines: &[OrderLine]) -> Result<()> {
            let mut orders = self.inner.orders.write().unwrap();
            let mut stored_lines = self.inner.lines.write().unwrap();
            orders.insert(order.id, order.clone());
            stored_lines.extend(lines.iter().cloned());
            Ok(())
        }

        async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>> {
            Ok(self.inner.orders.read().unwrap().get(&order_id).cloned())
        }

        async fn order_lines(&self, order_id: Uuid) -> Result<Vec<OrderLine>> {
            Ok(self
                .inner
                .lines
                .read()
                .unwrap()
                .iter()
                .filter(|line| line.order_id == order_id)
                .cloned()
                .collect())
        }

        async fn set_order_status(&self, order_id: Uuid, status: OrderStatus) -> Result<()> {
            let mut orders = self.inner.orders.write().unwrap();
            match orders.get_mut(&order_id) {
                Some(order) => {
                    order.status = status;
                    order.updated_at = Utc::now();
                    Ok(())
                }
                None => Err(super::super::error::SettlementError::OrderNotFound { order_id }.into()),
            }
        }

        async fn lock_order(&self, order_id: Uuid) -> Result<OrderLock> {
            let handle = self.order_lock_handle(order_id);
            Ok(OrderLock::new(handle.lock_owned().await))
        }

        async fn stale_pending_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
            Ok(self
                .inner
                .orders
                .read()
                .unwrap()
                .values()
                .filter(|o| o.status == OrderStatus::Pending && o.created_at < cutoff)
                .map(|o| o.id)
                .collect())
        }

        async fn record_payment_event(&self, event: &PaymentEvent) -> Result<bool> {
            let mut events = self.inner.events.write().unwrap();
            let key = (event.provider.clone(), event.provider_event_id.clone());
            if events.contains_key(&key) {
                return Ok(false);
            }
            events.insert(key, event.clone());
            Ok(true)
        }

        async fn upsert_payment(&self, payment: &Payment) -> Result<()> {
            let key = (
                payment.provider.clone(),
                payment.provider_payment_id.clone(),
            );
            self.inner
                .payments
                .write()
                .unwrap()
                .insert(key, payment.clone());
            Ok(())
        }

        async fn get_payment(
            &self,
            provider: &str,
            provider_payment_id: &str,
        ) -> Result<Option<Payment>> {
            Ok(self
                .inner
                .payments
                .read()
                .unwrap()
                .get(&(provider.to_string(), provider_payment_id.to_string()))
                .cloned())
        }

        async fn insert_ticket(&self, ticket: &TicketInstance) -> Result<bool> {
            let mut tickets = self.inner.tickets.write().unwrap();
            let key = (ticket.order_line_id, ticket.sequence);
            if tickets.contains_key(&key) {
                return Ok(false);
            }
            tickets.insert(key, ticket.clone());
            Ok(true)
        }

        async fn tickets_for_line(&self, order_line_id: Uuid) -> Result<Vec<TicketInstance>> {
            let mut tickets: Vec<TicketInstance> = self
                .inner
                .tickets
                .read()
                .unwrap()
                .values()
                .filter(|t| t.order_line_id == order_line_id)
                .cloned()
                .collect();
            tickets.sort_by_key(|t| t.sequence);
            Ok(tickets)
        }

        async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<TicketInstance>> {
            let mut tickets: Vec<TicketInstance> = self
                .inner
                .tickets
                .read()
                .unwrap()
                .values()
                .filter(|t| t.order_id == order_id)
                .cloned()
                .collect();
            tickets.sort_by_key(|t| (t.order_line_id, t.sequence));
            Ok(tickets)
        }
    }
}
