use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::common::{created_response, success_response};
use crate::entities::user_coupon::UserCouponStatus;
use crate::errors::ServiceError;
use crate::services::coupons::CreateCouponCommand;
use crate::services::Actor;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MyCouponsQuery {
    pub status: Option<UserCouponStatus>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub order_amount: Decimal,
}

// POST /api/v1/coupons
pub async fn create_coupon(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateCouponCommand>,
) -> Result<Response, ServiceError> {
    let coupon = state.services.coupons.create_coupon(payload, &actor).await?;
    Ok(created_response(coupon))
}

// GET /api/v1/coupons/mine
pub async fn list_my_coupons(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<MyCouponsQuery>,
) -> Result<Response, ServiceError> {
    let coupons = state
        .services
        .coupons
        .list_user_coupons(actor.user_id, query.status)
        .await?;
    Ok(success_response(coupons))
}

// POST /api/v1/coupons/:id/claim
pub async fn claim_coupon(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let claim = state
        .services
        .coupons
        .claim_coupon(actor.user_id, id)
        .await?;
    Ok(created_response(claim))
}

// POST /api/v1/coupons/:id/quote
pub async fn quote_coupon(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<QuoteRequest>,
) -> Result<Response, ServiceError> {
    let quote = state
        .services
        .coupons
        .validate_and_price(actor.user_id, id, payload.order_amount)
        .await?;
    Ok(success_response(quote))
}
