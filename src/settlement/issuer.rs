//! Deterministic ticket issuance.
//!
//! One [`TicketInstance`] per paid unit, keyed on (order line, sequence
//! number). The composite key is the idempotency anchor: re-running issuance
//! for an already-issued sequence number is a guaranteed no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

use super::order::OrderLine;
use super::store::SettlementStore;

/// Lifecycle state of an issued ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    Issued,
    CheckedIn,
    Void,
}

/// One physical, scannable unit of entry.
///
/// Unique on (order_line_id, sequence) with sequence running 1..=quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketInstance {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_line_id: Uuid,
    pub ticket_type_id: Uuid,
    pub event_id: Uuid,
    /// Position within the line, 1-based.
    pub sequence: u32,
    /// Unguessable scan token, generated independently per instance.
    pub token: String,
    pub state: TicketState,
    pub issued_at: DateTime<Utc>,
}

/// Length in bytes of the random scan token.
const TOKEN_LENGTH: usize = 32;

/// Generate a secure random scan token.
///
/// Never derived from the order or sequence number; predictability would let
/// an attacker forge check-in scans.
fn generate_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; TOKEN_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Issues ticket instances for paid order lines.
pub struct TicketIssuer<S: SettlementStore> {
    store: S,
}

impl<S: SettlementStore> TicketIssuer<S> {
    /// Create a new ticket issuer.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Issue one ticket per unit on the line, skipping sequence numbers that
    /// already exist.
    ///
    /// Returns the count actually created by this call: `quantity` on first
    /// issuance, 0 on a pure replay, and the missing remainder after a
    /// partially persisted earlier attempt.
    pub async fn issue(&self, line: &OrderLine, event_id: Uuid) -> Result<u32> {
        let mut created = 0;
        for sequence in 1..=line.quantity {
            let ticket = TicketInstance {
                id: Uuid::new_v4(),
                order_id: line.order_id,
                order_line_id: line.id,
                ticket_type_id: line.unit_id,
                event_id,
                sequence,
                token: generate_token(),
                state: TicketState::Issued,
                issued_at: Utc::now(),
            };
            if self.store.insert_ticket(&ticket).await? {
                created += 1;
            }
        }

        if created > 0 {
            tracing::debug!(
                target: "turnstile::settlement::issuer",
                order_line_id = %line.id,
                created,
                quantity = line.quantity,
                "Issued ticket instances"
            );
        }

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::inventory::UnitKind;
    use crate::settlement::order::{Order, OrderLine};
    use crate::settlement::store::test::InMemorySettlementStore;
    use std::collections::HashSet;

    async fn seed_line(store: &InMemorySettlementStore, quantity: u32) -> (OrderLine, Uuid) {
        let event_id = Uuid::new_v4();
        let order = Order::new(
            event_id,
            Uuid::new_v4(),
            "buyer@example.com",
            "EUR",
            i64::from(quantity) * 2500,
            0,
        )
        .unwrap();
        let line = OrderLine::new(
            order.id,
            Uuid::new_v4(),
            None,
            UnitKind::TicketType,
            quantity,
            2500,
        )
        .unwrap();
        store.create_order(&order, &[line.clone()]).await.unwrap();
        (line, event_id)
    }

    #[tokio::test]
    async fn test_issues_one_per_unit() {
        let store = InMemorySettlementStore::new();
        let (line, event_id) = seed_line(&store, 3).await;
        let issuer = TicketIssuer::new(store.clone());

        let created = issuer.issue(&line, event_id).await.unwrap();
        assert_eq!(created, 3);

        let tickets = store.tickets_for_line(line.id).await.unwrap();
        assert_eq!(tickets.len(), 3);
        let sequences: Vec<u32> = tickets.iter().map(|t| t.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_replay_is_noop() {
        let store = InMemorySettlementStore::new();
        let (line, event_id) = seed_line(&store, 2).await;
        let issuer = TicketIssuer::new(store.clone());

        assert_eq!(issuer.issue(&line, event_id).await.unwrap(), 2);
        assert_eq!(issuer.issue(&line, event_id).await.unwrap(), 0);

        let tickets = store.tickets_for_line(line.id).await.unwrap();
        assert_eq!(tickets.len(), 2);
    }

    #[tokio::test]
    async fn test_fills_in_missing_sequences() {
        let store = InMemorySettlementStore::new();
        let (line, event_id) = seed_line(&store, 3).await;
        let issuer = TicketIssuer::new(store.clone());

        // Simulate a partially persisted earlier attempt: only sequence 2 exists
        let partial = TicketInstance {
            id: Uuid::new_v4(),
            order_id: line.order_id,
            order_line_id: line.id,
            ticket_type_id: line.unit_id,
            event_id,
            sequence: 2,
            token: "preexisting".to_string(),
            state: TicketState::Issued,
            issued_at: Utc::now(),
        };
        assert!(store.insert_ticket(&partial).await.unwrap());

        let created = issuer.issue(&line, event_id).await.unwrap();
        assert_eq!(created, 2);

        let tickets = store.tickets_for_line(line.id).await.unwrap();
        assert_eq!(tickets.len(), 3);
        // The preexisting instance is untouched
        assert_eq!(tickets[1].token, "preexisting");
    }

    #[tokio::test]
    async fn test_tokens_are_unique_and_long() {
        let store = InMemorySettlementStore::new();
        let (line, event_id) = seed_line(&store, 10).await;
        let issuer = TicketIssuer::new(store.clone());

        issuer.issue(&line, event_id).await.unwrap();

        let tickets = store.tickets_for_line(line.id).await.unwrap();
        let tokens: HashSet<String> = tickets.iter().map(|t| t.token.clone()).collect();
        assert_eq!(tokens.len(), 10);
        for token in &tokens {
            assert_eq!(token.len(), TOKEN_LENGTH * 2);
        }
    }
}
