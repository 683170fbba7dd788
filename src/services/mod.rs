// Ledgers
pub mod coupons;
pub mod stock;

// Workflows
pub mod orders;
pub mod refunds;

// Background sweeps
pub mod reminders;

use chrono::{DateTime, Utc};
use rand::Rng;
use sea_orm::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Attempts at allocating a unique order or refund reference before giving up.
pub(crate) const MAX_REFERENCE_ATTEMPTS: usize = 5;

pub const ORDER_REFERENCE_PREFIX: &str = "ORD";
pub const REFUND_REFERENCE_PREFIX: &str = "REF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Customer,
    Admin,
}

/// The authenticated caller, as established by the upstream auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn customer(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: ActorRole::Customer,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: ActorRole::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }

    pub fn ensure_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "administrator role required".to_string(),
            ))
        }
    }

    /// Owners see their own records; admins see everything.
    pub fn ensure_can_access(&self, owner_id: Uuid) -> Result<(), ServiceError> {
        if self.is_admin() || self.user_id == owner_id {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "resource belongs to another user".to_string(),
            ))
        }
    }

    pub fn ensure_owner(&self, owner_id: Uuid) -> Result<(), ServiceError> {
        if self.user_id == owner_id {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "only the owner may perform this action".to_string(),
            ))
        }
    }
}

/// `PREFIX` + `YYYYMMDD` + `HHMMSS` (UTC) + 4-digit zero-padded random.
pub fn generate_reference(prefix: &str, now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("{}{}{:04}", prefix, now.format("%Y%m%d%H%M%S"), suffix)
}

pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reference_has_prefix_timestamp_and_suffix() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        let reference = generate_reference(ORDER_REFERENCE_PREFIX, now);
        assert_eq!(reference.len(), 3 + 8 + 6 + 4);
        assert!(reference.starts_with("ORD20240301090507"));
        assert!(reference[17..].chars().all(|c| c.is_ascii_digit()));

        let refund = generate_reference(REFUND_REFERENCE_PREFIX, now);
        assert!(refund.starts_with("REF20240301090507"));
    }

    #[test]
    fn actor_permissions() {
        let owner = Uuid::new_v4();
        let customer = Actor::customer(owner);
        let stranger = Actor::customer(Uuid::new_v4());
        let admin = Actor::admin(Uuid::new_v4());

        assert!(customer.ensure_can_access(owner).is_ok());
        assert!(stranger.ensure_can_access(owner).is_err());
        assert!(admin.ensure_can_access(owner).is_ok());
        assert!(admin.ensure_owner(owner).is_err());
        assert!(customer.ensure_admin().is_err());
        assert!(admin.ensure_admin().is_ok());
    }
}
