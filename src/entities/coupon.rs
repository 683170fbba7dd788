use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponType {
    /// `value` is a percentage of the order amount
    #[sea_orm(string_value = "PERCENT")]
    Percent,
    /// `value` is a flat amount
    #[sea_orm(string_value = "AMOUNT")]
    Amount,
}

/// Voucher definition with a limited number of claimable units.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub coupon_type: CouponType,
    pub value: Decimal,
    /// Minimum pre-discount order amount
    pub min_amount: Option<Decimal>,
    /// Cap for percentage discounts
    pub max_discount: Option<Decimal>,
    pub total_quantity: i32,
    /// Never exceeds `total_quantity`
    pub claimed_quantity: i32,
    pub limit_per_user: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_within_window(&self, at: DateTime<Utc>) -> bool {
        at >= self.valid_from && at <= self.valid_until
    }

    pub fn remaining(&self) -> i32 {
        (self.total_quantity - self.claimed_quantity).max(0)
    }
}
