//! Notification outbox.
//!
//! The settlement machine never talks to a mail or messaging system directly;
//! it durably records an intent to notify and moves on. A delivery worker
//! drains the outbox independently with per-message retry and exponential
//! backoff, so a slow or failing notification channel can never stall or fail
//! a settlement.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::Result;

/// Delivery state of an outbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    /// Retries exhausted.
    Dead,
}

/// One durable notification intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub org_id: Uuid,
    pub recipient: String,
    pub template_key: String,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
}

/// Trait for durable notification outboxes.
#[async_trait]
pub trait NotificationOutbox: Send + Sync {
    /// Record an intent to notify. Fire-and-forget from the caller's view.
    ///
    /// Returns `false` when a message with the same idempotency key was
    /// already enqueued; the duplicate is dropped.
    async fn enqueue(
        &self,
        org_id: Uuid,
        recipient: &str,
        template_key: &str,
        payload: serde_json::Value,
        idempotency_key: &str,
    ) -> Result<bool>;
}

/// Transport that actually delivers a notification (mail, push, ...).
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn deliver(&self, message: &OutboxMessage) -> Result<()>;
}

/// In-memory notification outbox.
///
/// Wraps data in Arc for cheap cloning. Suitable for tests and
/// single-process deployments; a production implementation persists the same
/// shape to a table drained by the worker.
#[derive(Default, Clone)]
pub struct InMemoryOutbox {
    inner: Arc<OutboxInner>,
}

#[derive(Default)]
struct OutboxInner {
    messages: RwLock<Vec<OutboxMessage>>,
    seen_keys: RwLock<HashSet<String>>,
}

impl InMemoryOutbox {
    /// Create a new empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages due for a delivery attempt, oldest first.
    pub fn due_messages(&self, now: DateTime<Utc>, limit: usize) -> Vec<OutboxMessage> {
        let messages = self.inner.messages.read().unwrap();
        let mut due: Vec<OutboxMessage> = messages
            .iter()
            .filter(|m| m.status == OutboxStatus::Pending && m.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|m| m.next_attempt_at);
        due.truncate(limit);
        due
    }

    /// Mark a message delivered.
    pub fn mark_delivered(&self, message_id: Uuid) {
        let mut messages = self.inner.messages.write().unwrap();
        if let Some(message) = messages.iter_mut().find(|m| m.id == message_id) {
            message.status = OutboxStatus::Delivered;
        }
    }

    /// Record a failed attempt, scheduling a retry with exponential backoff
    /// or marking the message dead once attempts are exhausted.
    pub fn mark_failed(&self, message_id: Uuid, max_attempts: u32, base_backoff: Duration) {
        let mut messages = self.inner.messages.write().unwrap();
        if let Some(message) = messages.iter_mut().find(|m| m.id == message_id) {
            message.attempts += 1;
            if message.attempts >= max_attempts {
                message.status = OutboxStatus::Dead;
            } else {
                let backoff = base_backoff * 2i32.saturating_pow(message.attempts - 1);
                message.next_attempt_at = Utc::now() + backoff;
            }
        }
    }

    /// All messages (for assertions).
    pub fn messages(&self) -> Vec<OutboxMessage> {
        self.inner.messages.read().unwrap().clone()
    }

    /// Count of messages ever enqueued (duplicates excluded).
    pub fn len(&self) -> usize {
        self.inner.messages.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl NotificationOutbox for InMemoryOutbox {
    async fn enqueue(
        &self,
        org_id: Uuid,
        recipient: &str,
        template_key: &str,
        payload: serde_json::Value,
        idempotency_key: &str,
    ) -> Result<bool> {
        {
            let mut seen = self.inner.seen_keys.write().unwrap();
            if !seen.insert(idempotency_key.to_string()) {
                tracing::debug!(
                    target: "turnstile::settlement::outbox",
                    idempotency_key,
                    "Duplicate notification intent dropped"
                );
                return Ok(false);
            }
        }

        let now = Utc::now();
        self.inner.messages.write().unwrap().push(OutboxMessage {
            id: Uuid::new_v4(),
            org_id,
            recipient: recipient.to_string(),
            template_key: template_key.to_string(),
            payload,
            idempotency_key: idempotency_key.to_string(),
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            enqueued_at: now,
        });
        Ok(true)
    }
}

/// Drains an outbox through a transport, retrying with backoff.
pub struct OutboxWorker<T: NotificationTransport> {
    outbox: InMemoryOutbox,
    transport: Arc<T>,
    max_attempts: u32,
    base_backoff: Duration,
    poll_interval: std::time::Duration,
}

impl<T: NotificationTransport> OutboxWorker<T> {
    /// Create a worker with its shutdown channel.
    #[must_use]
    pub fn new(
        outbox: InMemoryOutbox,
        transport: Arc<T>,
        max_attempts: u32,
        base_backoff: Duration,
    ) -> (Self, mpsc::Sender<()>, mpsc::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Self {
                outbox,
                transport,
                max_attempts,
                base_backoff,
                poll_interval: std::time::Duration::from_millis(100),
            },
            shutdown_tx,
            shutdown_rx,
        )
    }

    /// Run until a shutdown signal arrives.
    pub async fn start(self, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(target: "turnstile::settlement::outbox", "Outbox worker started");

        loop {
            let drained = self.drain_once().await;
            if drained == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = sleep(self.poll_interval) => {},
                }
            } else if shutdown_rx.try_recv().is_ok() {
                break;
            }
        }

        tracing::info!(target: "turnstile::settlement::outbox", "Outbox worker stopped");
    }

    /// Attempt delivery of everything currently due. Returns attempts made.
    pub async fn drain_once(&self) -> usize {
        let due = self.outbox.due_messages(Utc::now(), 32);
        let count = due.len();

        for message in due {
            match self.transport.deliver(&message).await {
                Ok(()) => {
                    self.outbox.mark_delivered(message.id);
                    tracing::debug!(
                        target: "turnstile::settlement::outbox",
                        message_id = %message.id,
                        template_key = %message.template_key,
                        "Notification delivered"
                    );
                }
                Err(e) => {
                    self.outbox
                        .mark_failed(message.id, self.max_attempts, self.base_backoff);
                    tracing::warn!(
                        target: "turnstile::settlement::outbox",
                        message_id = %message.id,
                        attempts = message.attempts + 1,
                        error = %e,
                        "Notification delivery failed"
                    );
                }
            }
        }

        count
    }
}
