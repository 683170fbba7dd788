//! Mobile-payment gateway adapter.
//!
//! The [`PaymentGateway`] trait is the seam the order and refund services talk to. The
//! production implementation is [`HttpPaymentGateway`]; tests substitute their own.

pub mod client;
pub mod signing;

pub use client::HttpPaymentGateway;

use async_trait::async_trait;
use http::HeaderMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Timed out, could not connect, or the gateway failed internally. The outcome of the
    /// call is unknown.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The gateway answered and refused the request.
    #[error("gateway rejected request: {code}: {message}")]
    Rejected { code: String, message: String },

    /// A gateway response carried a missing or wrong signature. The outcome is unknown.
    #[error("invalid gateway signature: {0}")]
    InvalidSignature(String),

    /// A verified 2xx response could not be decoded. The outcome is unknown.
    #[error("unreadable gateway response: {0}")]
    UnreadableResponse(String),

    /// An inbound callback could not be authenticated.
    #[error("unauthenticated callback: {0}")]
    Unauthenticated(String),

    /// A request could not be built, or an authenticated callback could not be understood.
    /// Nothing reached the gateway.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// True only when the gateway answered and refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Trade states reported by the gateway for a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeState {
    Success,
    NotPay,
    UserPaying,
    Closed,
    PayError,
    Other(String),
}

impl TradeState {
    pub fn parse(value: &str) -> Self {
        match value {
            "SUCCESS" => Self::Success,
            "NOTPAY" => Self::NotPay,
            "USERPAYING" => Self::UserPaying,
            "CLOSED" => Self::Closed,
            "PAYERROR" => Self::PayError,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "SUCCESS",
            Self::NotPay => "NOTPAY",
            Self::UserPaying => "USERPAYING",
            Self::Closed => "CLOSED",
            Self::PayError => "PAYERROR",
            Self::Other(other) => other,
        }
    }
}

/// Charge to create for a pending order.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub order_no: String,
    pub description: String,
    pub amount: Decimal,
    pub payer_account_id: String,
}

/// Opaque handle returned by the gateway for a created charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepayHandle {
    pub prepay_id: String,
}

/// Everything the client payment SDK needs to complete a charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPaymentParams {
    pub app_id: String,
    pub time_stamp: String,
    pub nonce_str: String,
    pub package: String,
    pub sign_type: String,
    pub pay_sign: String,
}

#[derive(Debug, Clone)]
pub struct OrderQueryResult {
    pub order_no: String,
    pub trade_state: TradeState,
    pub transaction_id: Option<String>,
    /// Paid amount in minor units, when the gateway reports one
    pub amount_total: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub refund_no: String,
    pub order_no: String,
    pub transaction_id: Option<String>,
    pub refund_amount: Decimal,
    pub order_amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundAccepted {
    pub gateway_refund_id: String,
    pub status: String,
}

/// Verified payment callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotification {
    pub event_id: String,
    pub order_no: String,
    pub trade_state: TradeState,
    pub transaction_id: Option<String>,
    /// Minor units
    pub amount_total: Option<i64>,
}

/// Verified refund callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundNotification {
    pub event_id: String,
    pub refund_no: String,
    pub succeeded: bool,
    pub refund_status: String,
    pub gateway_refund_id: Option<String>,
}

/// Acknowledgment body the gateway expects from callback endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookAck {
    pub code: String,
    pub message: String,
}

impl WebhookAck {
    pub fn success() -> Self {
        Self {
            code: "SUCCESS".to_string(),
            message: "OK".to_string(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            code: "FAIL".to_string(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == "SUCCESS"
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a charge for the order and returns the prepay handle.
    async fn create_charge(&self, request: &ChargeRequest) -> Result<PrepayHandle, GatewayError>;

    /// Signs the client-side parameters for a prepay handle.
    fn client_payment_params(&self, prepay: &PrepayHandle) -> ClientPaymentParams;

    /// Looks up the current trade state of an order.
    async fn query_order(&self, order_no: &str) -> Result<OrderQueryResult, GatewayError>;

    /// Asks the gateway to refund part or all of a paid order.
    async fn create_refund(&self, request: &RefundRequest)
        -> Result<RefundAccepted, GatewayError>;

    /// Authenticates and decodes a payment callback.
    fn parse_payment_notification(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<PaymentNotification, GatewayError>;

    /// Authenticates and decodes a refund callback.
    fn parse_refund_notification(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<RefundNotification, GatewayError>;
}

/// Converts a major-unit amount to integer minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|minor| minor.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| {
            GatewayError::Malformed(format!("amount {} cannot be expressed in minor units", amount))
        })
}

pub fn from_minor_units(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}

#[derive(Debug, Deserialize)]
struct NotificationEnvelope<R> {
    id: String,
    #[serde(default)]
    #[allow(dead_code)]
    event_type: Option<String>,
    resource: R,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AmountBody {
    pub total: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PaymentResource {
    out_trade_no: String,
    trade_state: String,
    transaction_id: Option<String>,
    amount: Option<AmountBody>,
}

#[derive(Debug, Deserialize)]
struct RefundResource {
    out_refund_no: String,
    refund_status: String,
    refund_id: Option<String>,
}

/// Decodes a payment callback body. Authentication is the caller's job.
pub fn decode_payment_notification(body: &[u8]) -> Result<PaymentNotification, GatewayError> {
    let envelope: NotificationEnvelope<PaymentResource> =
        serde_json::from_slice(body).map_err(|e| GatewayError::Malformed(e.to_string()))?;
    let resource = envelope.resource;
    Ok(PaymentNotification {
        event_id: envelope.id,
        order_no: resource.out_trade_no,
        trade_state: TradeState::parse(&resource.trade_state),
        transaction_id: resource.transaction_id,
        amount_total: resource.amount.and_then(|a| a.total),
    })
}

/// Decodes a refund callback body. Authentication is the caller's job.
pub fn decode_refund_notification(body: &[u8]) -> Result<RefundNotification, GatewayError> {
    let envelope: NotificationEnvelope<RefundResource> =
        serde_json::from_slice(body).map_err(|e| GatewayError::Malformed(e.to_string()))?;
    let resource = envelope.resource;
    Ok(RefundNotification {
        event_id: envelope.id,
        refund_no: resource.out_refund_no,
        succeeded: resource.refund_status == "SUCCESS",
        refund_status: resource.refund_status,
        gateway_refund_id: resource.refund_id,
    })
}
