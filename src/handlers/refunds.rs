use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::common::{created_response, success_response};
use crate::errors::ServiceError;
use crate::services::refunds::{CreateRefundCommand, RefundDecision};
use crate::services::Actor;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct ProcessRefundRequest {
    pub decision: RefundDecision,
    #[validate(length(max = 500, message = "Note cannot exceed 500 characters"))]
    pub note: Option<String>,
}

// POST /api/v1/refunds
pub async fn create_refund(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateRefundCommand>,
) -> Result<Response, ServiceError> {
    let refund = state.services.refunds.create_refund(payload, &actor).await?;
    Ok(created_response(refund))
}

// GET /api/v1/refunds/:id
pub async fn get_refund(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let refund = state.services.refunds.get_refund(id, &actor).await?;
    Ok(success_response(refund))
}

// POST /api/v1/admin/refunds/:id/process
pub async fn process_refund(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProcessRefundRequest>,
) -> Result<Response, ServiceError> {
    payload.validate()?;
    let refund = state
        .services
        .refunds
        .process_refund(id, payload.decision, payload.note, &actor)
        .await?;
    Ok(success_response(refund))
}

// POST /api/v1/admin/refunds/:id/retry
pub async fn retry_refund(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let refund = state.services.refunds.retry_refund(id, &actor).await?;
    Ok(success_response(refund))
}
