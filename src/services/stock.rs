//! Stock ledger: conditional adjustments of product inventory.
//!
//! Every function runs on the caller's connection so it joins the caller's transaction.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter};
use tracing::debug;
use uuid::Uuid;

use crate::entities::product;

/// Takes `quantity` units if at least that many remain. Returns `false` and changes nothing
/// otherwise, so stock never goes negative.
pub async fn decrement<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, DbErr> {
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::Stock.gte(quantity))
        .exec(conn)
        .await?;

    debug!(%product_id, quantity, rows = result.rows_affected, "stock decrement");
    Ok(result.rows_affected == 1)
}

/// Returns `quantity` units. `false` when the product does not exist.
pub async fn increment<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, DbErr> {
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).add(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .exec(conn)
        .await?;

    debug!(%product_id, quantity, rows = result.rows_affected, "stock increment");
    Ok(result.rows_affected == 1)
}

/// Counts one more paid booking for the product.
pub async fn record_booking<C: ConnectionTrait>(conn: &C, product_id: Uuid) -> Result<(), DbErr> {
    product::Entity::update_many()
        .col_expr(
            product::Column::BookingCount,
            Expr::col(product::Column::BookingCount).add(1),
        )
        .filter(product::Column::Id.eq(product_id))
        .exec(conn)
        .await?;
    Ok(())
}
