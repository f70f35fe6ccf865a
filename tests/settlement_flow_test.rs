//! End-to-end settlement flows: checkout, webhook settlement, issuance,
//! reaping and notification delivery over the in-memory store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use turnstile::config::SettlementConfig;
use turnstile::settlement::audit::test::CapturingAuditSink;
use turnstile::settlement::store::test::InMemorySettlementStore;
use turnstile::settlement::{
    Actor, CartLine, InMemoryOutbox, NotificationTransport, Order, OrderLine, OrderStatus,
    OutboxMessage, OutboxWorker, PaymentCallback, SellableUnit, SettlementEngine,
    SettlementStore, UnitKind, WebhookVerifier,
};

type TestEngine = SettlementEngine<InMemorySettlementStore, InMemoryOutbox, CapturingAuditSink>;

struct Harness {
    store: InMemorySettlementStore,
    outbox: Arc<InMemoryOutbox>,
    audit: Arc<CapturingAuditSink>,
    engine: TestEngine,
    event_id: Uuid,
    org_id: Uuid,
}

impl Harness {
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

    async fn ticket_unit(&self, name: &str, capacity: Option<u32>) -> SellableUnit {
        let mut unit = SellableUnit::ticket_type(self.event_id, self.org_id, name, 2500);
        unit.capacity = capacity;
        self.store.insert_unit(&unit).await.unwrap();
        unit
    }

    fn cart(&self, unit_id: Uuid, quantity: u32) -> Vec<CartLine> {
        vec![CartLine {
            unit_id,
            variant_id: None,
            quantity,
        }]
    }

    async fn checkout(&self, unit_id: Uuid, quantity: u32) -> Order {
        self.engine
            .checkout(
                &Actor::Shopper,
                turnstile::CheckoutRequest {
                    event_id: self.event_id,
                    org_id: self.org_id,
                    buyer_email: "buyer@example.com".to_string(),
                    currency: "EUR".to_string(),
                    discount_cents: 0,
                    lines: self.cart(unit_id, quantity),
                },
            )
            .await
            .unwrap()
            .order
            .expect("cart should be accepted")
    }

    /// Seed a pending order directly, bypassing checkout validation. Models
    /// carts that validated concurrently before either order existed.
    async fn seed_pending_order(&self, unit: &SellableUnit, quantity: u32) -> Order {
        let order = Order::new(
            self.event_id,
            self.org_id,
            "buyer@example.com",
            "EUR",
            i64::from(quantity) * 2500,
            0,
        )
        .unwrap();
        let line =
            OrderLine::new(order.id, unit.id, None, UnitKind::TicketType, quantity, 2500).unwrap();
        self.store.create_order(&order, &[line]).await.unwrap();
        order
    }

    fn paid_callback(&self, order_id: Uuid, event_id: &str) -> PaymentCallback {
        PaymentCallback {
            order_id,
            provider_event_id: event_id.to_string(),
            provider_payment_id: format!("tr_{}", order_id.simple()),
            status: "paid".to_string(),
            amount_cents: 0,
            currency: "EUR".to_string(),
        }
    }
}

#[tokio::test]
async fn test_checkout_to_tickets_happy_path() {
    let h = Harness::new();
    let unit = h.ticket_unit("Standard", Some(100)).await;

    let order = h.checkout(unit.id, 6).await;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_cents, 15_000);

    let outcome = h
        .engine
        .handle_webhook(&Actor::PaymentProvider, &h.paid_callback(order.id, "evt_1"))
        .await
        .unwrap();
    assert!(outcome.paid);
    assert_eq!(outcome.tickets_issued, 6);

    let tickets = h.store.tickets_for_order(order.id).await.unwrap();
    assert_eq!(tickets.len(), 6);
    let sequences: Vec<u32> = tickets.iter().map(|t| t.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
    // Tokens must be unique across instances
    let tokens: std::collections::HashSet<_> = tickets.iter().map(|t| t.token.clone()).collect();
    assert_eq!(tokens.len(), 6);

    assert_eq!(h.outbox.len(), 1);
    assert_eq!(
        h.engine.order_status(order.id).await.unwrap(),
        OrderStatus::Paid
    );
}

#[tokio::test]
async fn test_webhook_replay_creates_nothing_twice() {
    let h = Harness::new();
    let unit = h.ticket_unit("Standard", Some(100)).await;
    let order = h.checkout(unit.id, 6).await;

    let first = h
        .engine
        .handle_webhook(&Actor::PaymentProvider, &h.paid_callback(order.id, "evt_1"))
        .await
        .unwrap();
    assert!(first.paid);
    assert_eq!(first.tickets_issued, 6);

    // Exact redelivery: dropped at the gate
    let gate_replay = h
        .engine
        .handle_webhook(&Actor::PaymentProvider, &h.paid_callback(order.id, "evt_1"))
        .await
        .unwrap();
    assert!(!gate_replay.paid);
    assert_eq!(gate_replay.tickets_issued, 0);

    // Fresh event id for an already-settled order: absorbed by the machine
    let machine_replay = h
        .engine
        .handle_webhook(&Actor::PaymentProvider, &h.paid_callback(order.id, "evt_2"))
        .await
        .unwrap();
    assert!(!machine_replay.paid);
    assert_eq!(machine_replay.tickets_issued, 0);
    assert_eq!(machine_replay.message, "Order already paid");

    assert_eq!(h.store.tickets_for_order(order.id).await.unwrap().len(), 6);
    assert_eq!(h.outbox.len(), 1);
}

#[tokio::test]
async fn test_overbooking_failsafe_with_two_valid_carts() {
    let h = Harness::new();
    let unit = h.ticket_unit("Standard", Some(10)).await;

    // Both carts of 6 validated against 10 seats before either order existed
    let first = h.seed_pending_order(&unit, 6).await;
    let second = h.seed_pending_order(&unit, 6).await;

    let won = h
        .engine
        .handle_webhook(&Actor::PaymentProvider, &h.paid_callback(first.id, "evt_1"))
        .await
        .unwrap();
    assert!(won.paid);
    assert_eq!(won.tickets_issued, 6);

    let lost = h
        .engine
        .handle_webhook(&Actor::PaymentProvider, &h.paid_callback(second.id, "evt_2"))
        .await
        .unwrap();
    assert!(!lost.paid);
    assert!(lost.overbooked);
    assert_eq!(lost.tickets_issued, 0);
    assert!(lost.message.contains("refund required"));

    assert_eq!(
        h.engine.order_status(second.id).await.unwrap(),
        OrderStatus::Cancelled
    );
    assert!(h.store.tickets_for_order(second.id).await.unwrap().is_empty());
    assert!(h.audit.kinds().await.contains(&"overbooking_triggered"));
}

#[tokio::test]
async fn test_no_oversell_under_concurrent_settlement() {
    let h = Harness::new();
    let unit = h.ticket_unit("Standard", Some(10)).await;

    // Five orders of 3 seats each, all pending against 10 seats
    let mut orders = Vec::new();
    for _ in 0..5 {
        orders.push(h.seed_pending_order(&unit, 3).await);
    }

    let engine = Arc::new(h.engine);
    let mut handles = Vec::new();
    for (i, order) in orders.iter().enumerate() {
        let engine = engine.clone();
        let callback = PaymentCallback {
            order_id: order.id,
            provider_event_id: format!("evt_{i}"),
            provider_payment_id: format!("tr_{i}"),
            status: "paid".to_string(),
            amount_cents: 7500,
            currency: "EUR".to_string(),
        };
        handles.push(tokio::spawn(async move {
            engine
                .handle_webhook(&Actor::PaymentProvider, &callback)
                .await
                .unwrap()
        }));
    }

    let mut paid = 0;
    let mut overbooked = 0;
    let mut issued = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        if outcome.paid {
            paid += 1;
        }
        if outcome.overbooked {
            overbooked += 1;
        }
        issued += outcome.tickets_issued;
    }

    // 10 seats fit exactly three orders of 3; the rest hit the failsafe
    assert_eq!(paid, 3);
    assert_eq!(overbooked, 2);
    assert_eq!(issued, 9);
    assert_eq!(h.store.all_tickets().len(), 9);
}

#[tokio::test]
async fn test_capacity_rejection_reports_availability() {
    let h = Harness::new();
    let unit = h.ticket_unit("Standard", Some(10)).await;

    // 8 of 10 seats held by a pending order
    h.seed_pending_order(&unit, 8).await;

    let validation = h
        .engine
        .validate_cart(&Actor::Shopper, h.event_id, h.org_id, &h.cart(unit.id, 6))
        .await
        .unwrap();
    assert!(!validation.valid);
    assert_eq!(validation.total_cents, 0);
    let reason = validation.lines[0].reason.as_ref().unwrap();
    assert_eq!(reason.code(), "INSUFFICIENT_CAPACITY");
}

#[tokio::test]
async fn test_reaper_releases_capacity_for_new_buyers() {
    let h = Harness::new();
    let unit = h.ticket_unit("Standard", Some(10)).await;

    let abandoned = h.checkout(unit.id, 8).await;
    h.store
        .backdate_order(abandoned.id, Duration::hours(1))
        .await;

    // The abandoned cart still blocks a 6-seat purchase
    let before = h
        .engine
        .validate_cart(&Actor::Shopper, h.event_id, h.org_id, &h.cart(unit.id, 6))
        .await
        .unwrap();
    assert!(!before.valid);

    let reaped = h.engine.reap_stale_orders(&Actor::Scheduler).await.unwrap();
    assert_eq!(reaped, 1);
    assert_eq!(
        h.engine.order_status(abandoned.id).await.unwrap(),
        OrderStatus::Cancelled
    );

    let after = h
        .engine
        .validate_cart(&Actor::Shopper, h.event_id, h.org_id, &h.cart(unit.id, 6))
        .await
        .unwrap();
    assert!(after.valid);
    assert_eq!(after.total_cents, 15_000);
}

#[tokio::test]
async fn test_failed_payment_releases_capacity() {
    let h = Harness::new();
    let unit = h.ticket_unit("Standard", Some(10)).await;
    let order = h.checkout(unit.id, 8).await;

    let callback = PaymentCallback {
        order_id: order.id,
        provider_event_id: "evt_1".to_string(),
        provider_payment_id: "tr_1".to_string(),
        status: "expired".to_string(),
        amount_cents: 20_000,
        currency: "EUR".to_string(),
    };
    let outcome = h
        .engine
        .handle_webhook(&Actor::PaymentProvider, &callback)
        .await
        .unwrap();
    assert!(!outcome.paid);
    assert_eq!(
        h.engine.order_status(order.id).await.unwrap(),
        OrderStatus::Cancelled
    );

    let validation = h
        .engine
        .validate_cart(&Actor::Shopper, h.event_id, h.org_id, &h.cart(unit.id, 10))
        .await
        .unwrap();
    assert!(validation.valid);
}

struct RecordingTransport {
    delivered: AtomicU32,
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn deliver(&self, _message: &OutboxMessage) -> turnstile::Result<()> {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_confirmation_flows_through_outbox_worker() {
    let h = Harness::new();
    let unit = h.ticket_unit("Standard", Some(100)).await;
    let order = h.checkout(unit.id, 2).await;

    h.engine
        .handle_webhook(&Actor::PaymentProvider, &h.paid_callback(order.id, "evt_1"))
        .await
        .unwrap();
    assert_eq!(h.outbox.len(), 1);

    let transport = Arc::new(RecordingTransport {
        delivered: AtomicU32::new(0),
    });
    let (worker, _shutdown_tx, _shutdown_rx) = OutboxWorker::new(
        h.outbox.as_ref().clone(),
        transport.clone(),
        3,
        Duration::seconds(1),
    );

    assert_eq!(worker.drain_once().await, 1);
    assert_eq!(transport.delivered.load(Ordering::SeqCst), 1);
    // Nothing left due
    assert_eq!(worker.drain_once().await, 0);
}

#[tokio::test]
async fn test_signed_webhook_verifies_end_to_end() {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let h = Harness::new();
    let unit = h.ticket_unit("Standard", Some(10)).await;
    let order = h.checkout(unit.id, 2).await;

    let secret = "whsec_integration";
    let verifier = WebhookVerifier::new(secret, 300);

    let body = serde_json::json!({
        "order_id": order.id,
        "provider_event_id": "evt_signed",
        "provider_payment_id": "tr_signed",
        "status": "paid",
        "amount_cents": 5000,
        "currency": "EUR",
    })
    .to_string();

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{body}").as_bytes());
    let header = format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()));

    let callback = verifier.verify(body.as_bytes(), &header).unwrap();
    let outcome = h
        .engine
        .handle_webhook(&Actor::PaymentProvider, &callback)
        .await
        .unwrap();
    assert!(outcome.paid);
    assert_eq!(outcome.tickets_issued, 2);
}
