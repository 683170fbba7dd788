use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::common::{created_response, success_response, PaginatedResponse, PaginationParams};
use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::services::orders::CreateOrderCommand;
use crate::services::Actor;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl OrderListQuery {
    fn pagination(&self) -> PaginationParams {
        let defaults = PaginationParams::default();
        PaginationParams {
            page: self.page.unwrap_or(defaults.page),
            per_page: self.per_page.unwrap_or(defaults.per_page),
        }
    }
}

// POST /api/v1/orders
pub async fn create_order(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateOrderCommand>,
) -> Result<Response, ServiceError> {
    let details = state.services.orders.create_order(payload, &actor).await?;
    Ok(created_response(details))
}

// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<OrderListQuery>,
) -> Result<Response, ServiceError> {
    let (page, per_page) = query.pagination().normalized();
    let (orders, total) = state
        .services
        .orders
        .list_user_orders(&actor, query.status, page, per_page)
        .await?;
    Ok(success_response(PaginatedResponse::new(
        orders, page, per_page, total,
    )))
}

// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let details = state.services.orders.get_order(id, &actor).await?;
    Ok(success_response(details))
}

// POST /api/v1/orders/:id/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.cancel_order(id, &actor).await?;
    Ok(success_response(order))
}

// POST /api/v1/orders/:id/payment
pub async fn create_payment(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let params = state.services.orders.create_payment(id, &actor).await?;
    Ok(success_response(params))
}

// GET /api/v1/orders/no/:order_no/payment-status
pub async fn payment_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_no): Path<String>,
) -> Result<Response, ServiceError> {
    let view = state
        .services
        .orders
        .query_payment_status(&order_no, &actor)
        .await?;
    Ok(success_response(view))
}

// GET /api/v1/orders/:id/refunds
pub async fn list_order_refunds(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let refunds = state.services.refunds.list_order_refunds(id, &actor).await?;
    Ok(success_response(refunds))
}

// POST /api/v1/admin/orders/:id/confirm
pub async fn confirm_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.confirm_order(id, &actor).await?;
    Ok(success_response(order))
}

// POST /api/v1/admin/orders/:id/complete
pub async fn complete_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let order = state.services.orders.complete_order(id, &actor).await?;
    Ok(success_response(order))
}
