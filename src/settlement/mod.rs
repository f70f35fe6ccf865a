//! Ticket-sale settlement: capacity, payment callbacks and issuance.
//!
//! The subsystem settles the money-to-tickets boundary of an event shop.
//! Capacity is never stored as a counter: committed demand is derived from
//! pending and paid order lines under per-unit locks, so releases on
//! cancellation are automatic and a crash cannot leave a counter drifted.
//!
//! The pieces, in the order a sale flows through them:
//!
//! - [`capacity::CapacityValidator`] prices a cart and checks availability
//!   with skip-locked semantics (advisory, never writes)
//! - [`engine::SettlementEngine`] turns an accepted cart into a pending
//!   order that holds capacity
//! - [`webhook::WebhookVerifier`] authenticates the provider callback
//! - [`gate::PaymentEventGate`] deduplicates deliveries exactly once
//! - [`machine::SettlementStateMachine`] transitions the order, re-checks
//!   capacity authoritatively, and drives issuance
//! - [`issuer::TicketIssuer`] creates per-seat ticket instances, replay-safe
//! - [`reaper::StaleOrderReaper`] releases capacity held by abandoned carts
//! - [`outbox`] and [`audit`] carry the side effects
//!
//! Storage is behind [`store::SettlementStore`]; an in-memory implementation
//! ships under the `test-store` feature.

pub mod audit;
pub mod authz;
pub mod capacity;
pub mod engine;
pub mod error;
pub mod gate;
pub mod inventory;
pub mod issuer;
pub mod machine;
pub mod order;
pub mod outbox;
pub mod payment;
pub mod reaper;
pub mod store;
pub mod webhook;

pub use audit::{AuditSink, NoOpAuditSink, SettlementAuditEvent, TracingAuditSink};
pub use authz::{Action, Actor, Authorizer, Role};
pub use capacity::{CapacityValidator, CartLine, CartValidation, LineValidation, RejectReason};
pub use engine::{CheckoutOutcome, CheckoutRequest, SettlementEngine};
pub use error::SettlementError;
pub use gate::{Admission, PaymentEventGate};
pub use inventory::{ProductVariant, SalesWindow, SellableUnit, UnitKind};
pub use issuer::{TicketInstance, TicketIssuer, TicketState};
pub use machine::{SettlementOutcome, SettlementStateMachine};
pub use order::{Order, OrderLine, OrderStatus};
pub use outbox::{
    InMemoryOutbox, NotificationOutbox, NotificationTransport, OutboxMessage, OutboxStatus,
    OutboxWorker,
};
pub use payment::{Payment, PaymentCallback, PaymentEvent, PaymentStatus};
pub use reaper::StaleOrderReaper;
pub use store::{OrderLock, SettlementStore, UnitLocks};
pub use webhook::WebhookVerifier;
