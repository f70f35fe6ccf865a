//! # Turnstile
//!
//! A settlement engine for ticket sales: capacity reservation, payment
//! webhook idempotency and ticket issuance.
//!
//! # Features
//!
//! - **Derived inventory**: availability computed from order lines under
//!   per-unit locks, never a stored counter that can drift
//! - **Advisory validation**: cart checks use skip-locked semantics so the
//!   storefront never queues behind settlement
//! - **Exactly-once webhooks**: provider deliveries deduplicated on
//!   (provider, event id) with a single atomic insert
//! - **Replay-safe issuance**: tickets keyed (order line, sequence) so a
//!   re-run creates exactly the missing instances
//! - **Overbooking failsafe**: an authoritative capacity re-check at
//!   settlement cancels the late order instead of overselling
//! - **Stale-order reaping**: abandoned carts stop holding capacity after a
//!   configurable age
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use turnstile::config::SettlementConfig;
//! use turnstile::settlement::{
//!     InMemoryOutbox, SettlementEngine, TracingAuditSink,
//! };
//! use turnstile::settlement::store::test::InMemorySettlementStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     turnstile::init_tracing();
//!
//!     let config = SettlementConfig::builder().from_env().build();
//!     let engine = SettlementEngine::new(
//!         InMemorySettlementStore::new(),
//!         Arc::new(InMemoryOutbox::new()),
//!         Arc::new(TracingAuditSink),
//!         config,
//!     );
//!     let _ = engine;
//! }
//! ```

pub mod config;
pub mod error;
pub mod settlement;

pub use config::{SettlementConfig, SettlementConfigBuilder};
pub use error::{Result, TurnstileError};
pub use settlement::{
    Actor, CartLine, CartValidation, CheckoutOutcome, CheckoutRequest, PaymentCallback,
    SettlementEngine, SettlementOutcome, SettlementStore, WebhookVerifier,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults
///
/// This should be called early in your application, typically in main()
/// before assembling the engine.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "turnstile=debug")
/// - `TURNSTILE_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("TURNSTILE_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing from an explicit configuration
pub fn init_tracing_with_config(config: &SettlementConfig) {
    let env_filter = EnvFilter::new(&config.logging.level);

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
