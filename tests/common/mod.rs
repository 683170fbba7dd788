#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Method, Request},
    Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::{json, Value};
use studytrip_api::{
    config::{AppConfig, GatewayConfig},
    db::{self, DbConfig},
    entities::{
        app_user,
        coupon::{self, CouponType},
        order, product, refund,
    },
    gateway::{
        self, signing, ChargeRequest, ClientPaymentParams, GatewayError, OrderQueryResult,
        PaymentGateway, PaymentNotification, PrepayHandle, RefundAccepted, RefundNotification,
        RefundRequest, TradeState,
    },
    handlers,
    notifications::{Notification, NotificationDispatcher, NotificationError},
    services::{orders::CreateOrderCommand, Actor},
    AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

/// Header value the fake gateway accepts as a valid callback signature.
pub const VALID_SIGNATURE: &str = "valid-test-signature";

/// How the fake gateway answers refund submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundBehavior {
    Accept,
    Reject { code: String, message: String },
    Unavailable,
    /// A 2xx answer whose signature does not verify.
    BadSignature,
    /// A verified 2xx answer with an undecodable body.
    Unreadable,
}

/// In-process stand-in for the payment gateway.
pub struct FakeGateway {
    trade_states: Mutex<HashMap<String, OrderQueryResult>>,
    refund_behavior: Mutex<RefundBehavior>,
    charges: Mutex<Vec<ChargeRequest>>,
    refunds: Mutex<Vec<RefundRequest>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            trade_states: Mutex::new(HashMap::new()),
            refund_behavior: Mutex::new(RefundBehavior::Accept),
            charges: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
        }
    }

    /// Makes `query_order` report the order as paid.
    pub fn mark_paid(&self, order_no: &str, transaction_id: &str, amount_minor: i64) {
        self.trade_states.lock().unwrap().insert(
            order_no.to_string(),
            OrderQueryResult {
                order_no: order_no.to_string(),
                trade_state: TradeState::Success,
                transaction_id: Some(transaction_id.to_string()),
                amount_total: Some(amount_minor),
            },
        );
    }

    pub fn set_refund_behavior(&self, behavior: RefundBehavior) {
        *self.refund_behavior.lock().unwrap() = behavior;
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().unwrap().clone()
    }

    pub fn refund_requests(&self) -> Vec<RefundRequest> {
        self.refunds.lock().unwrap().clone()
    }
}

fn check_test_signature(headers: &HeaderMap) -> Result<(), GatewayError> {
    match headers
        .get(signing::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(VALID_SIGNATURE) => Ok(()),
        Some(_) => Err(GatewayError::Unauthenticated("signature mismatch".into())),
        None => Err(GatewayError::Unauthenticated("missing signature".into())),
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<PrepayHandle, GatewayError> {
        self.charges.lock().unwrap().push(request.clone());
        Ok(PrepayHandle {
            prepay_id: format!("prepay-{}", request.order_no),
        })
    }

    fn client_payment_params(&self, prepay: &PrepayHandle) -> ClientPaymentParams {
        ClientPaymentParams {
            app_id: "app-test".to_string(),
            time_stamp: "1700000000".to_string(),
            nonce_str: "nonce".to_string(),
            package: format!("prepay_id={}", prepay.prepay_id),
            sign_type: signing::SIGN_TYPE.to_string(),
            pay_sign: "signed".to_string(),
        }
    }

    async fn query_order(&self, order_no: &str) -> Result<OrderQueryResult, GatewayError> {
        Ok(self
            .trade_states
            .lock()
            .unwrap()
            .get(order_no)
            .cloned()
            .unwrap_or_else(|| OrderQueryResult {
                order_no: order_no.to_string(),
                trade_state: TradeState::NotPay,
                transaction_id: None,
                amount_total: None,
            }))
    }

    async fn create_refund(
        &self,
        request: &RefundRequest,
    ) -> Result<RefundAccepted, GatewayError> {
        self.refunds.lock().unwrap().push(request.clone());
        let behavior = self.refund_behavior.lock().unwrap().clone();
        match behavior {
            RefundBehavior::Accept => Ok(RefundAccepted {
                gateway_refund_id: format!("gw-{}", request.refund_no),
                status: "PROCESSING".to_string(),
            }),
            RefundBehavior::Reject { code, message } => {
                Err(GatewayError::Rejected { code, message })
            }
            RefundBehavior::Unavailable => {
                Err(GatewayError::Unavailable("request timed out".to_string()))
            }
            RefundBehavior::BadSignature => Err(GatewayError::InvalidSignature(
                "signature mismatch".to_string(),
            )),
            RefundBehavior::Unreadable => Err(GatewayError::UnreadableResponse(
                "missing field `refund_id`".to_string(),
            )),
        }
    }

    fn parse_payment_notification(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<PaymentNotification, GatewayError> {
        check_test_signature(headers)?;
        gateway::decode_payment_notification(body)
    }

    fn parse_refund_notification(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<RefundNotification, GatewayError> {
        check_test_signature(headers)?;
        gateway::decode_refund_notification(body)
    }
}

/// Keeps every dispatched notification for assertions.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingDispatcher {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.kind() == kind)
            .count()
    }

    /// Waits until at least `expected` notifications of `kind` arrived.
    pub async fn wait_for(&self, kind: &str, expected: usize) -> usize {
        for _ in 0..100 {
            let count = self.count_kind(kind);
            if count >= expected {
                return count;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.count_kind(kind)
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

pub fn test_gateway_config() -> GatewayConfig {
    serde_json::from_value(json!({
        "base_url": "http://127.0.0.1:9",
        "app_id": "app-test",
        "merchant_id": "mch-test",
        "merchant_serial_no": "serial-test",
        "api_key": "0123456789abcdef0123",
        "platform_secret": "platform-secret-0123",
        "notify_url": "https://trips.test/api/v1/payments/notify",
        "refund_notify_url": "https://trips.test/api/v1/payments/refund-notify"
    }))
    .expect("valid gateway config")
}

/// Application state backed by a throwaway SQLite file, a fake gateway and a recording notifier.
pub struct TestApp {
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingDispatcher>,
    router: Router,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_reservation(false).await
    }

    /// `reserve_stock_on_create` toggles stock reservation at order creation.
    pub async fn with_reservation(reserve_stock_on_create: bool) -> Self {
        Self::build(reserve_stock_on_create, 1).await
    }

    /// A pool with several connections, so transactions from different tasks overlap.
    pub async fn with_connections(max_connections: u32) -> Self {
        Self::build(false, max_connections).await
    }

    async fn build(reserve_stock_on_create: bool, max_connections: u32) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());

        let pool = db::establish_connection_with_config(&DbConfig {
            url: url.clone(),
            max_connections,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            ..Default::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let mut cfg = AppConfig::new(
            url,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
            test_gateway_config(),
        );
        cfg.reserve_stock_on_create = reserve_stock_on_create;

        let gateway = Arc::new(FakeGateway::new());
        let notifier = Arc::new(RecordingDispatcher::default());
        let state = AppState::new(db.clone(), cfg, gateway.clone(), notifier.clone());
        let router = handlers::router(state.clone());

        Self {
            state,
            db,
            gateway,
            notifier,
            router,
            _dir: dir,
        }
    }

    /// Send a request against the router with optional actor headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        actor: Option<&Actor>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            builder = builder
                .header("x-actor-id", actor.user_id.to_string())
                .header(
                    "x-actor-role",
                    if actor.is_admin() { "admin" } else { "customer" },
                );
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts a raw callback body with the given signature header.
    pub async fn post_callback(
        &self,
        uri: &str,
        body: &Value,
        signature: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(signing::SIGNATURE_HEADER, signature);
        }
        let request = builder
            .body(Body::from(serde_json::to_vec(body).expect("serialize callback")))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_product(&self, price: Decimal, stock: i32) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Glacier field school".to_string()),
            price: Set(price),
            stock: Set(stock),
            booking_count: Set(0),
            is_published: Set(true),
            min_age: Set(None),
            max_age: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_user(&self) -> app_user::Model {
        let now = Utc::now();
        let id = Uuid::new_v4();
        app_user::ActiveModel {
            id: Set(id),
            nickname: Set(format!("traveller-{}", &id.to_string()[..8])),
            payment_account_id: Set(Some(format!("openid-{}", id))),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_coupon(
        &self,
        coupon_type: CouponType,
        value: Decimal,
        total_quantity: i32,
        min_amount: Option<Decimal>,
        max_discount: Option<Decimal>,
    ) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Spring research grant".to_string()),
            coupon_type: Set(coupon_type),
            value: Set(value),
            min_amount: Set(min_amount),
            max_discount: Set(max_discount),
            total_quantity: Set(total_quantity),
            claimed_quantity: Set(0),
            limit_per_user: Set(1),
            valid_from: Set(now - chrono::Duration::days(1)),
            valid_until: Set(now + chrono::Duration::days(30)),
            is_enabled: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed coupon")
    }

    pub async fn product(&self, id: Uuid) -> product::Model {
        product::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("query product")
            .expect("product exists")
    }

    pub async fn order(&self, id: Uuid) -> order::Model {
        order::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("query order")
            .expect("order exists")
    }

    pub async fn refund(&self, id: Uuid) -> refund::Model {
        refund::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("query refund")
            .expect("refund exists")
    }

    /// Creates a PENDING order through the service.
    pub async fn create_order(
        &self,
        actor: &Actor,
        product_id: Uuid,
        participant_count: i32,
        coupon_id: Option<Uuid>,
    ) -> order::Model {
        self.state
            .services
            .orders
            .create_order(order_command(product_id, participant_count, coupon_id), actor)
            .await
            .expect("create order")
            .order
    }

    /// Creates an order and drives it to PAID with a payment callback.
    pub async fn paid_order(
        &self,
        actor: &Actor,
        product_id: Uuid,
        participant_count: i32,
    ) -> order::Model {
        let order = self
            .create_order(actor, product_id, participant_count, None)
            .await;
        let ack = self
            .state
            .services
            .orders
            .handle_payment_notify(payment_success(&order, "txn-seed"))
            .await;
        assert!(ack.is_success(), "seed payment failed: {:?}", ack);
        self.order(order.id).await
    }
}

pub fn order_command(
    product_id: Uuid,
    participant_count: i32,
    coupon_id: Option<Uuid>,
) -> CreateOrderCommand {
    CreateOrderCommand {
        product_id,
        participant_name: "Ada Lovelace".to_string(),
        participant_age: Some(16),
        participant_phone: "+86 138 0000 0000".to_string(),
        participant_count,
        travel_date: travel_date_in(10),
        remark: None,
        coupon_id,
    }
}

pub fn travel_date_in(days: i64) -> NaiveDate {
    (Utc::now() + chrono::Duration::days(days)).date_naive()
}

pub fn payment_success(order: &order::Model, transaction_id: &str) -> PaymentNotification {
    PaymentNotification {
        event_id: format!("evt-{}", Uuid::new_v4()),
        order_no: order.order_no.clone(),
        trade_state: TradeState::Success,
        transaction_id: Some(transaction_id.to_string()),
        amount_total: Some(gateway::to_minor_units(order.total_amount).unwrap()),
    }
}

pub fn refund_result(refund: &refund::Model, succeeded: bool) -> RefundNotification {
    RefundNotification {
        event_id: format!("evt-{}", Uuid::new_v4()),
        refund_no: refund.refund_no.clone(),
        succeeded,
        refund_status: if succeeded { "SUCCESS" } else { "ABNORMAL" }.to_string(),
        gateway_refund_id: Some(format!("gw-{}", refund.refund_no)),
    }
}

/// Callback envelope as the gateway posts it.
pub fn payment_callback_body(event_id: &str, order: &order::Model) -> Value {
    json!({
        "id": event_id,
        "event_type": "TRANSACTION.SUCCESS",
        "resource": {
            "out_trade_no": order.order_no,
            "trade_state": "SUCCESS",
            "transaction_id": "txn-callback",
            "amount": { "total": gateway::to_minor_units(order.total_amount).unwrap() }
        }
    })
}

pub fn refund_callback_body(event_id: &str, refund: &refund::Model, status: &str) -> Value {
    json!({
        "id": event_id,
        "event_type": "REFUND.SUCCESS",
        "resource": {
            "out_refund_no": refund.refund_no,
            "refund_status": status,
            "refund_id": format!("gw-{}", refund.refund_no)
        }
    })
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::hours(hours)
}
