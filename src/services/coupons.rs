use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::{is_unique_violation, Actor};
use crate::entities::coupon::{self, CouponType};
use crate::entities::user_coupon::{self, UserCouponStatus};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCouponCommand {
    #[validate(length(min = 1, max = 100, message = "Coupon name must be between 1 and 100 characters"))]
    pub name: String,
    pub coupon_type: CouponType,
    pub value: Decimal,
    pub min_amount: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    #[validate(range(min = 1, message = "Total quantity must be at least 1"))]
    pub total_quantity: i32,
    #[validate(range(min = 1, message = "Per-user limit must be at least 1"))]
    pub limit_per_user: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CreateCouponCommand {
    fn check_policy(&self) -> Result<(), ServiceError> {
        match self.coupon_type {
            CouponType::Percent if self.value <= Decimal::ZERO || self.value > Decimal::ONE_HUNDRED => {
                return Err(ServiceError::ValidationError(
                    "Percentage coupons need a value in (0, 100]".to_string(),
                ));
            }
            CouponType::Amount if self.value <= Decimal::ZERO => {
                return Err(ServiceError::ValidationError(
                    "Amount coupons need a positive value".to_string(),
                ));
            }
            _ => {}
        }
        if self.valid_from >= self.valid_until {
            return Err(ServiceError::ValidationError(
                "valid_from must be before valid_until".to_string(),
            ));
        }
        if matches!(self.max_discount, Some(cap) if cap <= Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "max_discount must be positive".to_string(),
            ));
        }
        if matches!(self.min_amount, Some(min) if min < Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "min_amount cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Priced preview of a coupon against an order amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponQuote {
    pub coupon_id: Uuid,
    pub user_coupon_id: Uuid,
    pub discount: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserCouponView {
    #[serde(flatten)]
    pub claim: user_coupon::Model,
    pub coupon: Option<coupon::Model>,
}

/// Discount for `order_amount`, rounded to cents and never above the amount itself.
pub fn compute_discount(
    coupon_type: CouponType,
    value: Decimal,
    max_discount: Option<Decimal>,
    order_amount: Decimal,
) -> Decimal {
    if order_amount <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let raw = match coupon_type {
        CouponType::Percent => {
            let pct = order_amount * value / Decimal::ONE_HUNDRED;
            match max_discount {
                Some(cap) => pct.min(cap),
                None => pct,
            }
        }
        CouponType::Amount => value,
    };
    raw.max(Decimal::ZERO)
        .min(order_amount)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .min(order_amount)
}

/// Coupon ledger: claims, pricing and redemption.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, command), fields(name = %command.name))]
    pub async fn create_coupon(
        &self,
        command: CreateCouponCommand,
        actor: &Actor,
    ) -> Result<coupon::Model, ServiceError> {
        actor.ensure_admin()?;
        command.validate()?;
        command.check_policy()?;

        let now = Utc::now();
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(command.name),
            coupon_type: Set(command.coupon_type),
            value: Set(command.value),
            min_amount: Set(command.min_amount),
            max_discount: Set(command.max_discount),
            total_quantity: Set(command.total_quantity),
            claimed_quantity: Set(0),
            limit_per_user: Set(command.limit_per_user),
            valid_from: Set(command.valid_from),
            valid_until: Set(command.valid_until),
            is_enabled: Set(command.is_enabled),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create coupon");
            ServiceError::DatabaseError(e)
        })?;

        info!(coupon_id = %model.id, "Coupon created");
        Ok(model)
    }

    pub async fn get_coupon(&self, coupon_id: Uuid) -> Result<coupon::Model, ServiceError> {
        coupon::Entity::find_by_id(coupon_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))
    }

    /// Claims one unit of a coupon for the user.
    #[instrument(skip(self), fields(user_id = %user_id, coupon_id = %coupon_id))]
    pub async fn claim_coupon(
        &self,
        user_id: Uuid,
        coupon_id: Uuid,
    ) -> Result<user_coupon::Model, ServiceError> {
        let coupon = self.get_coupon(coupon_id).await?;
        let now = Utc::now();

        if !coupon.is_enabled {
            return Err(ServiceError::ValidationError(
                "Coupon is not enabled".to_string(),
            ));
        }
        if now < coupon.valid_from {
            return Err(ServiceError::ValidationError(
                "Coupon cannot be claimed yet".to_string(),
            ));
        }
        if now > coupon.valid_until {
            return Err(ServiceError::Expired("Coupon has expired".to_string()));
        }

        // UNIQUE(user_id, coupon_id) caps every user at one claim row per coupon.
        let existing = user_coupon::Entity::find()
            .filter(user_coupon::Column::UserId.eq(user_id))
            .filter(user_coupon::Column::CouponId.eq(coupon_id))
            .count(&*self.db)
            .await?;
        if existing > 0 {
            return Err(ServiceError::Conflict(
                "Coupon already claimed".to_string(),
            ));
        }
        if coupon.remaining() == 0 {
            return Err(ServiceError::Exhausted("Coupon is sold out".to_string()));
        }

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for coupon claim");
            ServiceError::DatabaseError(e)
        })?;

        let taken = coupon::Entity::update_many()
            .col_expr(
                coupon::Column::ClaimedQuantity,
                Expr::col(coupon::Column::ClaimedQuantity).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(now))
            .filter(coupon::Column::Id.eq(coupon_id))
            .filter(coupon::Column::IsEnabled.eq(true))
            .filter(
                Expr::col(coupon::Column::ClaimedQuantity)
                    .lt(Expr::col(coupon::Column::TotalQuantity)),
            )
            .exec(&txn)
            .await?;
        if taken.rows_affected == 0 {
            return Err(ServiceError::Exhausted("Coupon is sold out".to_string()));
        }

        let claim = user_coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            coupon_id: Set(coupon_id),
            status: Set(UserCouponStatus::Available),
            expires_at: Set(coupon.valid_until),
            used_at: Set(None),
            order_id: Set(None),
            created_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ServiceError::Conflict("Coupon already claimed".to_string())
            } else {
                error!(error = %e, "Failed to insert coupon claim");
                ServiceError::DatabaseError(e)
            }
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit coupon claim");
            ServiceError::DatabaseError(e)
        })?;

        info!(user_coupon_id = %claim.id, "Coupon claimed");
        Ok(claim)
    }

    /// Read-only pricing preview. Does not touch the claim.
    #[instrument(skip(self), fields(user_id = %user_id, coupon_id = %coupon_id))]
    pub async fn validate_and_price(
        &self,
        user_id: Uuid,
        coupon_id: Uuid,
        order_amount: Decimal,
    ) -> Result<CouponQuote, ServiceError> {
        if order_amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Order amount must be positive".to_string(),
            ));
        }
        quote_on(&*self.db, user_id, coupon_id, order_amount, Utc::now()).await
    }

    pub async fn list_user_coupons(
        &self,
        user_id: Uuid,
        status: Option<UserCouponStatus>,
    ) -> Result<Vec<UserCouponView>, ServiceError> {
        let mut query = user_coupon::Entity::find()
            .filter(user_coupon::Column::UserId.eq(user_id))
            .order_by_desc(user_coupon::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(user_coupon::Column::Status.eq(status));
        }

        let rows = query
            .find_also_related(coupon::Entity)
            .all(&*self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(claim, coupon)| UserCouponView { claim, coupon })
            .collect())
    }

    /// Moves AVAILABLE claims past their expiry to EXPIRED. Returns how many changed.
    #[instrument(skip(self))]
    pub async fn expire_claims(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let result = user_coupon::Entity::update_many()
            .col_expr(
                user_coupon::Column::Status,
                Expr::value(UserCouponStatus::Expired),
            )
            .filter(user_coupon::Column::Status.eq(UserCouponStatus::Available))
            .filter(user_coupon::Column::ExpiresAt.lt(now))
            .exec(&*self.db)
            .await?;
        if result.rows_affected > 0 {
            info!(expired = result.rows_affected, "Expired coupon claims");
        }
        Ok(result.rows_affected)
    }
}

/// Prices a claimed coupon on `conn`, so order creation can run it inside its transaction.
pub(crate) async fn quote_on<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    coupon_id: Uuid,
    order_amount: Decimal,
    now: DateTime<Utc>,
) -> Result<CouponQuote, ServiceError> {
    let claim = user_coupon::Entity::find()
        .filter(user_coupon::Column::UserId.eq(user_id))
        .filter(user_coupon::Column::CouponId.eq(coupon_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Coupon has not been claimed".to_string()))?;
    let coupon = coupon::Entity::find_by_id(coupon_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))?;

    if claim.status != UserCouponStatus::Available {
        return Err(ServiceError::Conflict(format!(
            "Coupon claim is no longer available ({:?})",
            claim.status
        )));
    }
    if now > coupon.valid_until || now > claim.expires_at {
        return Err(ServiceError::Expired("Coupon has expired".to_string()));
    }
    if let Some(min) = coupon.min_amount {
        if order_amount < min {
            return Err(ServiceError::ValidationError(format!(
                "Order amount {} is below the coupon minimum {}",
                order_amount, min
            )));
        }
    }

    let discount = compute_discount(
        coupon.coupon_type,
        coupon.value,
        coupon.max_discount,
        order_amount,
    );
    Ok(CouponQuote {
        coupon_id,
        user_coupon_id: claim.id,
        discount,
        total: order_amount - discount,
    })
}

/// Flips an AVAILABLE claim to USED for `order_id`. Zero rows means someone else used it.
pub(crate) async fn redeem<C: ConnectionTrait>(
    conn: &C,
    user_coupon_id: Uuid,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let result = user_coupon::Entity::update_many()
        .col_expr(user_coupon::Column::Status, Expr::value(UserCouponStatus::Used))
        .col_expr(user_coupon::Column::UsedAt, Expr::value(Some(now)))
        .col_expr(user_coupon::Column::OrderId, Expr::value(Some(order_id)))
        .filter(user_coupon::Column::Id.eq(user_coupon_id))
        .filter(user_coupon::Column::Status.eq(UserCouponStatus::Available))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        warn!(%user_coupon_id, "Coupon claim was redeemed concurrently");
        return Err(ServiceError::Conflict(
            "Coupon has already been used".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn percent_discount_respects_cap() {
        assert_eq!(
            compute_discount(CouponType::Percent, dec!(10), Some(dec!(20)), dec!(300)),
            dec!(20)
        );
        assert_eq!(
            compute_discount(CouponType::Percent, dec!(10), Some(dec!(30)), dec!(200)),
            dec!(20)
        );
    }

    #[test]
    fn amount_discount_is_capped_by_order_amount() {
        assert_eq!(
            compute_discount(CouponType::Amount, dec!(50), None, dec!(40)),
            dec!(40)
        );
    }

    #[test]
    fn percent_discount_rounds_to_cents() {
        assert_eq!(
            compute_discount(CouponType::Percent, dec!(15), None, dec!(33.33)),
            dec!(5.00)
        );
        assert_eq!(
            compute_discount(CouponType::Percent, dec!(12.5), None, dec!(0.9)),
            dec!(0.11)
        );
    }

    fn command(coupon_type: CouponType, value: Decimal) -> CreateCouponCommand {
        CreateCouponCommand {
            name: "Spring".into(),
            coupon_type,
            value,
            min_amount: None,
            max_discount: None,
            total_quantity: 10,
            limit_per_user: 1,
            valid_from: Utc::now(),
            valid_until: Utc::now() + chrono::Duration::days(30),
            is_enabled: true,
        }
    }

    #[test]
    fn coupon_value_policy() {
        assert!(command(CouponType::Percent, dec!(100)).check_policy().is_ok());
        assert!(command(CouponType::Percent, dec!(0)).check_policy().is_err());
        assert!(command(CouponType::Percent, dec!(100.01)).check_policy().is_err());
        assert!(command(CouponType::Amount, dec!(0)).check_policy().is_err());
        assert!(command(CouponType::Amount, dec!(5)).check_policy().is_ok());

        let mut inverted = command(CouponType::Amount, dec!(5));
        inverted.valid_until = inverted.valid_from;
        assert!(inverted.check_policy().is_err());
    }
}
