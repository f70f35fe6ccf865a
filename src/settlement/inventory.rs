//! Sellable inventory: ticket types and products with optional variants.
//!
//! A [`SellableUnit`] is the unit the capacity logic reasons about. Sold
//! counts are never stored on the unit; they are derived from order lines
//! under a lock on every capacity decision (see
//! [`SettlementStore::committed_demand`](super::store::SettlementStore::committed_demand)).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a unit admits people (ticket type) or is merchandise (product).
///
/// Ticket-type lines produce [`TicketInstance`](super::issuer::TicketInstance)s
/// on payment; product lines do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    TicketType,
    Product,
}

/// An inventory-bearing offering with a capacity ceiling and a sales window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellableUnit {
    pub id: Uuid,
    /// Event this unit belongs to.
    pub event_id: Uuid,
    /// Organization that owns the event.
    pub org_id: Uuid,
    pub kind: UnitKind,
    pub name: String,
    /// Price in minor units (cents).
    pub price_cents: i64,
    pub currency: String,
    /// Capacity ceiling. `None` means unlimited.
    pub capacity: Option<u32>,
    /// Sales open at this instant. `None` means open since forever.
    pub sale_starts_at: Option<DateTime<Utc>>,
    /// Sales close at this instant. `None` means never.
    pub sale_ends_at: Option<DateTime<Utc>>,
    /// Maximum quantity a single order may carry for this unit.
    pub max_per_order: Option<u32>,
    /// Restricted upgrade: only purchasable alongside a line for this unit.
    pub requires_companion: Option<Uuid>,
    pub active: bool,
    /// Variants, only meaningful for products. A variant line consumes both
    /// the variant's own capacity and the parent product's.
    pub variants: Vec<ProductVariant>,
}

/// A purchasable variation of a product (e.g. shirt size).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: Uuid,
    pub name: String,
    /// Overrides the parent product's price when set.
    pub price_cents: Option<i64>,
    /// Variant-level capacity ceiling. `None` means limited only by the parent.
    pub capacity: Option<u32>,
    pub active: bool,
}

impl SellableUnit {
    /// Create a ticket type with unlimited capacity and an always-open window.
    #[must_use]
    pub fn ticket_type(event_id: Uuid, org_id: Uuid, name: impl Into<String>, price_cents: i64) -> Self {
        Self::new(event_id, org_id, UnitKind::TicketType, name, price_cents)
    }

    /// Create a product with unlimited capacity and an always-open window.
    #[must_use]
    pub fn product(event_id: Uuid, org_id: Uuid, name: impl Into<String>, price_cents: i64) -> Self {
        Self::new(event_id, org_id, UnitKind::Product, name, price_cents)
    }

    fn new(
        event_id: Uuid,
        org_id: Uuid,
        kind: UnitKind,
        name: impl Into<String>,
        price_cents: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            org_id,
            kind,
            name: name.into(),
            price_cents,
            currency: "EUR".to_string(),
            capacity: None,
            sale_starts_at: None,
            sale_ends_at: None,
            max_per_order: None,
            requires_companion: None,
            active: true,
            variants: Vec::new(),
        }
    }

    /// Where `now` falls relative to the sales window.
    #[must_use]
    pub fn sales_window(&self, now: DateTime<Utc>) -> SalesWindow {
        if let Some(starts) = self.sale_starts_at {
            if now < starts {
                return SalesWindow::NotStarted;
            }
        }
        if let Some(ends) = self.sale_ends_at {
            if now >= ends {
                return SalesWindow::Ended;
            }
        }
        SalesWindow::Open
    }

    /// Look up a variant by id.
    #[must_use]
    pub fn variant(&self, variant_id: Uuid) -> Option<&ProductVariant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    /// Effective unit price for a line, honoring variant overrides.
    #[must_use]
    pub fn price_for(&self, variant_id: Option<Uuid>) -> Option<i64> {
        match variant_id {
            None => Some(self.price_cents),
            Some(id) => self
                .variant(id)
                .map(|v| v.price_cents.unwrap_or(self.price_cents)),
        }
    }
}

/// Position of an instant relative to a unit's sales window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SalesWindow {
    NotStarted,
    Open,
    Ended,
}
