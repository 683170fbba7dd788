use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PAID")]
    Paid,
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "REFUNDED")]
    Refunded,
}

impl OrderStatus {
    /// Money has been collected for the order.
    pub fn is_paid_or_later(self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Confirmed | Self::Completed | Self::Refunded
        )
    }

    /// Statuses a completed refund may move to REFUNDED.
    pub fn refundable_states() -> [OrderStatus; 3] {
        [Self::Paid, Self::Confirmed, Self::Completed]
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Confirmed => "CONFIRMED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
        };
        f.write_str(s)
    }
}

/// One booking of a product for a group of participants.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// External reference, `ORD` + timestamp + random suffix
    #[sea_orm(unique)]
    pub order_no: String,

    pub user_id: Uuid,
    pub product_id: Uuid,
    pub status: OrderStatus,

    /// Post-discount amount, fixed at creation
    pub total_amount: Decimal,

    /// Amount reported by the gateway; zero until paid
    pub paid_amount: Decimal,

    pub participant_name: String,
    pub participant_age: Option<i32>,
    pub participant_phone: String,
    pub participant_count: i32,
    pub travel_date: NaiveDate,
    pub remark: Option<String>,

    /// Gateway transaction id, set when the order is paid
    pub transaction_id: Option<String>,

    /// The order currently holds `participant_count` units of product stock
    pub stock_deducted: bool,

    /// Paid while stock was unavailable; needs manual reconciliation
    pub stock_shortfall: bool,

    pub reminder_sent: bool,
    pub reminder_sent_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(
        belongs_to = "super::app_user::Entity",
        from = "Column::UserId",
        to = "super::app_user::Column::Id"
    )]
    User,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::app_user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_or_later_excludes_open_and_cancelled() {
        assert!(!OrderStatus::Pending.is_paid_or_later());
        assert!(!OrderStatus::Cancelled.is_paid_or_later());
        assert!(OrderStatus::Paid.is_paid_or_later());
        assert!(OrderStatus::Refunded.is_paid_or_later());
    }

    #[test]
    fn serializes_as_upper_case() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::Confirmed).unwrap(),
            "\"CONFIRMED\""
        );
        assert_eq!(OrderStatus::Paid.to_string(), "PAID");
    }
}
