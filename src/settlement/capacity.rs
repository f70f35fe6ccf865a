//! Pre-checkout capacity validation.
//!
//! [`CapacityValidator::validate`] is the advisory gate in front of order
//! creation: it locks every unit in the cart for the duration of one call,
//! checks sales windows and derived demand, and returns itemized acceptance
//! or rejection. It performs no writes; callers persist an order only after
//! full acceptance.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::Result;

use super::error::SettlementError;
use super::inventory::{SalesWindow, UnitKind};
use super::store::SettlementStore;

/// One proposed cart entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub unit_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: u32,
}

/// Why a cart line was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum RejectReason {
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "SALES_NOT_STARTED")]
    SalesNotStarted,
    #[serde(rename = "SALES_ENDED")]
    SalesEnded,
    #[serde(rename = "INSUFFICIENT_CAPACITY")]
    InsufficientCapacity { available: u32 },
    #[serde(rename = "EXCEEDS_MAX_PER_ORDER")]
    ExceedsMaxPerOrder { max: u32 },
    #[serde(rename = "RESTRICTED_UPGRADE")]
    RestrictedUpgrade,
}

impl RejectReason {
    /// Stable reason code for API consumers.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::SalesNotStarted => "SALES_NOT_STARTED",
            Self::SalesEnded => "SALES_ENDED",
            Self::InsufficientCapacity { .. } => "INSUFFICIENT_CAPACITY",
            Self::ExceedsMaxPerOrder { .. } => "EXCEEDS_MAX_PER_ORDER",
            Self::RestrictedUpgrade => "RESTRICTED_UPGRADE",
        }
    }
}

/// Per-line validation detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineValidation {
    pub unit_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: u32,
    pub accepted: bool,
    pub reason: Option<RejectReason>,
    /// Captured price per unit, present only on accepted lines.
    pub unit_price_cents: Option<i64>,
    pub line_total_cents: Option<i64>,
}

/// Result of validating a whole cart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartValidation {
    /// True only when every line was accepted.
    pub valid: bool,
    /// Sum of accepted line totals, in minor units.
    pub total_cents: i64,
    pub lines: Vec<LineValidation>,
}

/// The pre-checkout capacity gate.
pub struct CapacityValidator<S: SettlementStore> {
    store: S,
}

impl<S: SettlementStore> CapacityValidator<S> {
    /// Create a new capacity validator.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Validate a proposed cart against inventory and sales windows.
    ///
    /// All unit locks are taken up front (skip-locked, stable sorted order)
    /// and held until every line has been evaluated, so a concurrent
    /// validator cannot slip between two of this call's checks and exhaust
    /// capacity this call believed was available. A unit another validation
    /// currently holds is treated as transiently unavailable rather than
    /// waited on.
    ///
    /// # Errors
    /// Only hard failures (malformed request, unreachable store) surface as
    /// errors; every domain rejection is part of the returned structure.
    pub async fn validate(&self, event_id: Uuid, cart: &[CartLine]) -> Result<CartValidation> {
        for line in cart {
            if line.quantity == 0 {
                return Err(SettlementError::InvalidOrder {
                    reason: "cart line quantity must be at least 1".to_string(),
                }
                .into());
            }
        }

        let unit_ids: Vec<Uuid> = cart.iter().map(|l| l.unit_id).collect();
        let locks = self.store.lock_units(&unit_ids).await?;

        // Units present anywhere in the cart, for restricted-upgrade checks
        let cart_units: HashSet<Uuid> = cart.iter().map(|l| l.unit_id).collect();

        // Per-unit totals across the whole cart, for per-order maximums
        let mut cart_totals: HashMap<Uuid, u32> = HashMap::new();
        for line in cart {
            *cart_totals.entry(line.unit_id).or_insert(0) += line.quantity;
        }

        // Quantities already granted to earlier lines of this same cart
        let mut allocated_unit: HashMap<Uuid, u32> = HashMap::new();
        let mut allocated_variant: HashMap<(Uuid, Uuid), u32> = HashMap::new();

        let now = Utc::now();
        let mut lines = Vec::with_capacity(cart.len());
        let mut total_cents = 0i64;
        let mut valid = true;

        for line in cart {
            let outcome = self
                .validate_line(
                    event_id,
                    line,
                    &locks,
                    &cart_units,
                    &cart_totals,
                    &allocated_unit,
                    &allocated_variant,
                    now,
                )
                .await?;

            match outcome {
                Ok(unit_price_cents) => {
                    *allocated_unit.entry(line.unit_id).or_insert(0) += line.quantity;
                    if let Some(variant_id) = line.variant_id {
                        *allocated_variant
                            .entry((line.unit_id, variant_id))
                            .or_insert(0) += line.quantity;
                    }
                    let line_total = unit_price_cents * i64::from(line.quantity);
                    total_cents += line_total;
                    lines.push(LineValidation {
                        unit_id: line.unit_id,
                        variant_id: line.variant_id,
                        quantity: line.quantity,
                        accepted: true,
                        reason: None,
                        unit_price_cents: Some(unit_price_cents),
                        line_total_cents: Some(line_total),
                    });
                }
                Err(reason) => {
                    valid = false;
                    lines.push(LineValidation {
                        unit_id: line.unit_id,
                        variant_id: line.variant_id,
                        quantity: line.quantity,
                        accepted: false,
                        reason: Some(reason),
                        unit_price_cents: None,
                        line_total_cents: None,
                    });
                }
            }
        }

        if !valid {
            total_cents = 0;
        }

        tracing::debug!(
            target: "turnstile::settlement::capacity",
            event_id = %event_id,
            valid,
            line_count = lines.len(),
            "Cart validated"
        );

        Ok(CartValidation {
            valid,
            total_cents,
            lines,
        })
    }

    /// Evaluate a single line. `Ok(price)` means accepted.
    #[allow(clippy::too_many_arguments)]
    async fn validate_line(
        &self,
        event_id: Uuid,
        line: &CartLine,
        locks: &super::store::UnitLocks,
        cart_units: &HashSet<Uuid>,
        cart_totals: &HashMap<Uuid, u32>,
        allocated_unit: &HashMap<Uuid, u32>,
        allocated_variant: &HashMap<(Uuid, Uuid), u32>,
        now: chrono::DateTime<Utc>,
    ) -> Result<std::result::Result<i64, RejectReason>> {
        // A unit mid-validation elsewhere is transiently unavailable
        if locks.is_contended(line.unit_id) {
            return Ok(Err(RejectReason::InsufficientCapacity { available: 0 }));
        }

        let unit = match self.store.get_unit(line.unit_id).await? {
            Some(unit) if unit.active && unit.event_id == event_id => unit,
            _ => return Ok(Err(RejectReason::NotFound)),
        };

        let variant = match line.variant_id {
            None => None,
            Some(variant_id) => {
                if unit.kind != UnitKind::Product {
                    return Ok(Err(RejectReason::NotFound));
                }
                match unit.variant(variant_id) {
                    Some(variant) if variant.active => Some(variant.clone()),
                    _ => return Ok(Err(RejectReason::NotFound)),
                }
            }
        };

        match unit.sales_window(now) {
            SalesWindow::NotStarted => return Ok(Err(RejectReason::SalesNotStarted)),
            SalesWindow::Ended => return Ok(Err(RejectReason::SalesEnded)),
            SalesWindow::Open => {}
        }

        if let Some(max) = unit.max_per_order {
            let cart_total = cart_totals.get(&line.unit_id).copied().unwrap_or(0);
            if cart_total > max {
                return Ok(Err(RejectReason::ExceedsMaxPerOrder { max }));
            }
        }

        if let Some(companion) = unit.requires_companion {
            if !cart_units.contains(&companion) {
                return Ok(Err(RejectReason::RestrictedUpgrade));
            }
        }

        // Tightest availability across the unit and, if present, the variant
        let mut available: Option<u32> = None;

        if let Some(capacity) = unit.capacity {
            let committed = self
                .store
                .committed_demand(line.unit_id, None, None)
                .await?;
            let own = allocated_unit.get(&line.unit_id).copied().unwrap_or(0);
            let free = capacity.saturating_sub(committed).saturating_sub(own);
            available = Some(free);
        }

        if let Some(variant) = &variant {
            if let Some(capacity) = variant.capacity {
                let committed = self
                    .store
                    .committed_demand(line.unit_id, Some(variant.id), None)
                    .await?;
                let own = allocated_variant
                    .get(&(line.unit_id, variant.id))
                    .copied()
                    .unwrap_or(0);
                let free = capacity.saturating_sub(committed).saturating_sub(own);
                available = Some(available.map_or(free, |a| a.min(free)));
            }
        }

        if let Some(available) = available {
            if line.quantity > available {
                return Ok(Err(RejectReason::InsufficientCapacity { available }));
            }
        }

        let price = unit
            .price_for(line.variant_id)
            .ok_or_else(|| SettlementError::internal("variant vanished under lock"))?;

        Ok(Ok(price))
    }
}
