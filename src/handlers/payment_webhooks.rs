//! Gateway callback endpoints. They always answer with a [`WebhookAck`] body.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::{debug, warn};

use crate::gateway::{GatewayError, WebhookAck};
use crate::AppState;

fn ack_response(ack: WebhookAck) -> (StatusCode, Json<WebhookAck>) {
    let status = if ack.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ack))
}

fn rejected_response(err: GatewayError) -> (StatusCode, Json<WebhookAck>) {
    match err {
        GatewayError::Unauthenticated(message) => {
            warn!(%message, "Rejected unauthenticated gateway callback");
            (StatusCode::UNAUTHORIZED, Json(WebhookAck::fail(message)))
        }
        other => {
            warn!(error = %other, "Could not decode gateway callback");
            ack_response(WebhookAck::fail(other.to_string()))
        }
    }
}

// POST /api/v1/payments/notify
pub async fn payment_notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    let notification = match state.gateway.parse_payment_notification(&headers, &body) {
        Ok(notification) => notification,
        Err(e) => return rejected_response(e),
    };

    let key = format!("payment:{}", notification.event_id);
    if state.webhook_cache.contains(&key).await {
        debug!(event_id = %notification.event_id, "Replayed payment callback");
        return ack_response(WebhookAck::success());
    }

    let ack = state
        .services
        .orders
        .handle_payment_notify(notification)
        .await;
    if ack.is_success() {
        state.webhook_cache.insert(&key).await;
    }
    ack_response(ack)
}

// POST /api/v1/payments/refund-notify
pub async fn refund_notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookAck>) {
    let notification = match state.gateway.parse_refund_notification(&headers, &body) {
        Ok(notification) => notification,
        Err(e) => return rejected_response(e),
    };

    let key = format!("refund:{}", notification.event_id);
    if state.webhook_cache.contains(&key).await {
        debug!(event_id = %notification.event_id, "Replayed refund callback");
        return ack_response(WebhookAck::success());
    }

    let ack = state
        .services
        .refunds
        .handle_refund_notify(notification)
        .await;
    if ack.is_success() {
        state.webhook_cache.insert(&key).await;
    }
    ack_response(ack)
}
