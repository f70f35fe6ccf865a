//! Authorization for settlement entry points.
//!
//! Permissions live in one explicit table checked at the service boundary,
//! so who may do what is auditable by reading this file. Denials surface as
//! [`SettlementError::NotAuthorized`], which maps to a forbidden response.

use std::fmt;
use uuid::Uuid;

use crate::error::Result;

use super::error::SettlementError;

/// Organizer role within an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Admin,
    Staff,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Staff => "staff",
        }
    }
}

/// The identity performing a settlement operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// An anonymous or authenticated buyer on the public storefront.
    Shopper,
    /// A member of the organization that owns the event.
    Organizer { role: Role, org_id: Uuid },
    /// A verified payment-provider webhook.
    PaymentProvider,
    /// The internal background scheduler.
    Scheduler,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shopper => write!(f, "shopper"),
            Self::Organizer { role, org_id } => {
                write!(f, "organizer({}, org={})", role.as_str(), org_id)
            }
            Self::PaymentProvider => write!(f, "payment_provider"),
            Self::Scheduler => write!(f, "scheduler"),
        }
    }
}

/// Operations guarded by the permission table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ValidateCart,
    CreateOrder,
    SettlePayment,
    ReapStaleOrders,
}

impl Action {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidateCart => "validate_cart",
            Self::CreateOrder => "create_order",
            Self::SettlePayment => "settle_payment",
            Self::ReapStaleOrders => "reap_stale_orders",
        }
    }
}

/// The permission table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authorizer;

impl Authorizer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// True when `actor` may perform `action` against `org_id`'s data.
    #[must_use]
    pub fn allows(&self, actor: &Actor, action: Action, org_id: Uuid) -> bool {
        match (actor, action) {
            // Storefront: anyone may price a cart and start an order
            (Actor::Shopper, Action::ValidateCart | Action::CreateOrder) => true,
            // Organizers act only within their own organization
            (Actor::Organizer { org_id: own, .. }, Action::ValidateCart | Action::CreateOrder) => {
                *own == org_id
            }
            // Settlement is driven exclusively by verified provider callbacks
            (Actor::PaymentProvider, Action::SettlePayment) => true,
            // Reaping is the scheduler's job alone
            (Actor::Scheduler, Action::ReapStaleOrders) => true,
            _ => false,
        }
    }

    /// Check the table, returning a forbidden error on denial.
    ///
    /// # Errors
    /// [`SettlementError::NotAuthorized`] when the table denies the pair.
    pub fn require(&self, actor: &Actor, action: Action, org_id: Uuid) -> Result<()> {
        if self.allows(actor, action, org_id) {
            Ok(())
        } else {
            tracing::warn!(
                target: "turnstile::settlement::authz",
                actor = %actor,
                action = action.as_str(),
                org_id = %org_id,
                "Action denied"
            );
            Err(SettlementError::NotAuthorized {
                actor: actor.to_string(),
                action: action.as_str().to_string(),
            }
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shopper_can_shop_but_not_settle() {
        let authz = Authorizer::new();
        let org = Uuid::new_v4();
        assert!(authz.allows(&Actor::Shopper, Action::ValidateCart, org));
        assert!(authz.allows(&Actor::Shopper, Action::CreateOrder, org));
        assert!(!authz.allows(&Actor::Shopper, Action::SettlePayment, org));
        assert!(!authz.allows(&Actor::Shopper, Action::ReapStaleOrders, org));
    }

    #[test]
    fn test_organizer_is_scoped_to_own_org() {
        let authz = Authorizer::new();
        let own = Uuid::new_v4();
        let other = Uuid::new_v4();
        let actor = Actor::Organizer {
            role: Role::Admin,
            org_id: own,
        };
        assert!(authz.allows(&actor, Action::CreateOrder, own));
        assert!(!authz.allows(&actor, Action::CreateOrder, other));
    }

    #[test]
    fn test_provider_only_settles() {
        let authz = Authorizer::new();
        let org = Uuid::new_v4();
        assert!(authz.allows(&Actor::PaymentProvider, Action::SettlePayment, org));
        assert!(!authz.allows(&Actor::PaymentProvider, Action::CreateOrder, org));
    }

    #[test]
    fn test_scheduler_only_reaps() {
        let authz = Authorizer::new();
        let org = Uuid::new_v4();
        assert!(authz.allows(&Actor::Scheduler, Action::ReapStaleOrders, org));
        assert!(!authz.allows(&Actor::Scheduler, Action::SettlePayment, org));
    }

    #[test]
    fn test_denial_is_forbidden_error() {
        let authz = Authorizer::new();
        let err = authz
            .require(&Actor::Shopper, Action::SettlePayment, Uuid::new_v4())
            .unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }
}
