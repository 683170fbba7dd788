pub mod auth;
pub mod common;
pub mod coupons;
pub mod orders;
pub mod payment_webhooks;
pub mod refunds;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::gateway::PaymentGateway;
use crate::notifications::NotificationDispatcher;
use crate::services::coupons::CouponService;
use crate::services::orders::{OrderService, OrderSettings};
use crate::services::refunds::RefundService;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub refunds: Arc<RefundService>,
    pub coupons: Arc<CouponService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationDispatcher>,
        settings: OrderSettings,
    ) -> Self {
        let orders = Arc::new(OrderService::new(
            db.clone(),
            gateway.clone(),
            notifier.clone(),
            settings,
        ));
        let refunds = Arc::new(RefundService::new(db.clone(), gateway, notifier));
        let coupons = Arc::new(CouponService::new(db));
        Self {
            orders,
            refunds,
            coupons,
        }
    }
}

fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(orders::create_order).get(orders::list_orders))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/cancel", post(orders::cancel_order))
        .route("/orders/:id/payment", post(orders::create_payment))
        .route("/orders/:id/refunds", get(orders::list_order_refunds))
        .route(
            "/orders/no/:order_no/payment-status",
            get(orders::payment_status),
        )
}

fn coupon_routes() -> Router<AppState> {
    Router::new()
        .route("/coupons", post(coupons::create_coupon))
        .route("/coupons/mine", get(coupons::list_my_coupons))
        .route("/coupons/:id/claim", post(coupons::claim_coupon))
        .route("/coupons/:id/quote", post(coupons::quote_coupon))
}

fn refund_routes() -> Router<AppState> {
    Router::new()
        .route("/refunds", post(refunds::create_refund))
        .route("/refunds/:id", get(refunds::get_refund))
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/orders/:id/confirm", post(orders::confirm_order))
        .route("/admin/orders/:id/complete", post(orders::complete_order))
        .route("/admin/refunds/:id/process", post(refunds::process_refund))
        .route("/admin/refunds/:id/retry", post(refunds::retry_refund))
}

fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/payments/notify", post(payment_webhooks::payment_notify))
        .route(
            "/payments/refund-notify",
            post(payment_webhooks::refund_notify),
        )
}

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .merge(order_routes())
        .merge(coupon_routes())
        .merge(refund_routes())
        .merge(admin_routes())
        .merge(webhook_routes())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let database = match state.db.ping().await {
        Ok(()) => "up",
        Err(_) => "down",
    };
    Json(json!({
        "status": "ok",
        "database": database,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
