//! Orders and order lines.
//!
//! An [`Order`] is a shopper's transaction header; its [`OrderLine`]s capture
//! unit prices at checkout time so later price edits never change what a
//! shopper was charged. Orders are never physically deleted; only the
//! settlement state machine and the stale-order reaper flip their status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::SettlementError;
use super::inventory::UnitKind;

/// Order lifecycle status.
///
/// `pending` is the only non-terminal state. Terminal states are sinks:
/// re-entering one with the same signal is a no-op, never an error, because
/// payment providers redeliver callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
    Failed,
    Refunded,
}

impl OrderStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether order lines in this status count toward committed demand.
    ///
    /// Pending orders hold capacity advisorily; paid orders hold it for good.
    #[must_use]
    pub fn holds_capacity(&self) -> bool {
        matches!(self, Self::Pending | Self::Paid)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One shopping transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub event_id: Uuid,
    pub org_id: Uuid,
    pub buyer_email: String,
    pub status: OrderStatus,
    pub currency: String,
    /// Sum of line totals, in minor units.
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    /// Always `subtotal - discount`; enforced at construction.
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a pending order.
    ///
    /// # Errors
    /// Fails if the discount is negative or exceeds the subtotal.
    pub fn new(
        event_id: Uuid,
        org_id: Uuid,
        buyer_email: impl Into<String>,
        currency: impl Into<String>,
        subtotal_cents: i64,
        discount_cents: i64,
    ) -> Result<Self, SettlementError> {
        if discount_cents < 0 || discount_cents > subtotal_cents {
            return Err(SettlementError::InvalidOrder {
                reason: format!(
                    "discount {} out of range for subtotal {}",
                    discount_cents, subtotal_cents
                ),
            });
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            event_id,
            org_id,
            buyer_email: buyer_email.into(),
            status: OrderStatus::Pending,
            currency: currency.into(),
            subtotal_cents,
            discount_cents,
            total_cents: subtotal_cents - discount_cents,
            created_at: now,
            updated_at: now,
        })
    }
}

/// One priced item within an order.
///
/// References exactly one of {ticket type, product(+variant)}. A variant may
/// only appear on a product line; this is enforced at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: Uuid,
    pub order_id: Uuid,
    pub unit_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub kind: UnitKind,
    pub quantity: u32,
    /// Price per unit captured at checkout, in minor units.
    pub unit_price_cents: i64,
    pub line_total_cents: i64,
}

impl OrderLine {
    /// Create an order line with its total computed from quantity and price.
    ///
    /// # Errors
    /// Fails if quantity is zero or a variant is attached to a ticket-type line.
    pub fn new(
        order_id: Uuid,
        unit_id: Uuid,
        variant_id: Option<Uuid>,
        kind: UnitKind,
        quantity: u32,
        unit_price_cents: i64,
    ) -> Result<Self, SettlementError> {
        if quantity == 0 {
            return Err(SettlementError::InvalidOrder {
                reason: "line quantity must be at least 1".to_string(),
            });
        }
        if variant_id.is_some() && kind == UnitKind::TicketType {
            return Err(SettlementError::InvalidOrder {
                reason: "ticket-type lines cannot reference a variant".to_string(),
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            order_id,
            unit_id,
            variant_id,
            kind,
            quantity,
            unit_price_cents,
            line_total_cents: unit_price_cents * i64::from(quantity),
        })
    }
}
