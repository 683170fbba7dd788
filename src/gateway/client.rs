use async_trait::async_trait;
use http::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use super::signing::{self, RequestSigner};
use super::{
    decode_payment_notification, decode_refund_notification, to_minor_units, AmountBody,
    ChargeRequest, ClientPaymentParams, GatewayError, OrderQueryResult, PaymentGateway,
    PaymentNotification, PrepayHandle, RefundAccepted, RefundNotification, RefundRequest,
    TradeState,
};
use crate::config::GatewayConfig;

const JSAPI_PATH: &str = "/v3/pay/transactions/jsapi";
const QUERY_PATH: &str = "/v3/pay/transactions/out-trade-no";
const REFUND_PATH: &str = "/v3/refund/domestic/refunds";
const CURRENCY: &str = "CNY";

/// A request whose signature has been computed over its exact bytes.
///
/// Sending the same value again re-sends identical bytes and headers.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: Method,
    pub url: String,
    pub path_and_query: String,
    pub body: String,
    pub authorization: String,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct PrepayBody {
    prepay_id: String,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    out_trade_no: String,
    trade_state: String,
    transaction_id: Option<String>,
    amount: Option<AmountBody>,
}

#[derive(Debug, Deserialize)]
struct RefundBody {
    refund_id: String,
    status: String,
}

/// [`PaymentGateway`] over the gateway's REST API.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    signer: RequestSigner,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("failed to build client: {}", e)))?;
        let signer = RequestSigner::new(
            config.merchant_id.clone(),
            config.merchant_serial_no.clone(),
            config.api_key.clone(),
        );
        Ok(Self {
            client,
            config,
            signer,
        })
    }

    /// Serializes and signs a request once.
    pub fn sign_request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<SignedRequest, GatewayError> {
        let body = match body {
            Some(value) => serde_json::to_string(value)
                .map_err(|e| GatewayError::Malformed(format!("request body: {}", e)))?,
            None => String::new(),
        };
        let timestamp = chrono::Utc::now().timestamp();
        let nonce = signing::nonce();
        let authorization =
            self.signer
                .authorization(method.as_str(), path_and_query, timestamp, &nonce, &body);

        Ok(SignedRequest {
            url: format!(
                "{}{}",
                self.config.base_url.trim_end_matches('/'),
                path_and_query
            ),
            method,
            path_and_query: path_and_query.to_string(),
            body,
            authorization,
        })
    }

    /// Sends a signed request and decodes a verified 2xx body.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path_and_query))]
    pub async fn send<T: DeserializeOwned>(&self, request: &SignedRequest) -> Result<T, GatewayError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .header(reqwest::header::AUTHORIZATION, &request.authorization)
            .header(reqwest::header::ACCEPT, "application/json");
        if !request.body.is_empty() {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, timeout = e.is_timeout(), "gateway transport failure");
            GatewayError::Unavailable(e.to_string())
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("reading response: {}", e)))?;

        if status.is_server_error() {
            warn!(status = %status, "gateway answered with a server error");
            return Err(GatewayError::Unavailable(format!(
                "gateway returned {}",
                status
            )));
        }

        if !status.is_success() {
            let (code, message) = match serde_json::from_slice::<GatewayErrorBody>(&bytes) {
                Ok(body) => (body.code, body.message),
                Err(_) => (
                    status.as_u16().to_string(),
                    String::from_utf8_lossy(&bytes).into_owned(),
                ),
            };
            warn!(status = %status, code = %code, "gateway rejected request");
            return Err(GatewayError::Rejected { code, message });
        }

        self.verify_response(&headers, &bytes)?;
        debug!(status = %status, "gateway call succeeded");

        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(status = %status, error = %e, "gateway answer could not be decoded");
            GatewayError::UnreadableResponse(e.to_string())
        })
    }

    fn verify_response(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), GatewayError> {
        signing::verify_platform_signature(
            headers,
            body,
            &self.config.platform_secret,
            self.config.signature_tolerance_secs,
            chrono::Utc::now().timestamp(),
        )
        .map_err(GatewayError::InvalidSignature)
    }

    fn verify_callback(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), GatewayError> {
        signing::verify_callback(
            headers,
            body,
            &self.config.platform_secret,
            self.config.signature_tolerance_secs,
            chrono::Utc::now().timestamp(),
        )
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(order_no = %request.order_no))]
    async fn create_charge(&self, request: &ChargeRequest) -> Result<PrepayHandle, GatewayError> {
        let total = to_minor_units(request.amount)?;
        let body = json!({
            "appid": self.config.app_id,
            "mchid": self.config.merchant_id,
            "description": request.description,
            "out_trade_no": request.order_no,
            "notify_url": self.config.notify_url,
            "amount": { "total": total, "currency": CURRENCY },
            "payer": { "openid": request.payer_account_id },
        });
        let signed = self.sign_request(Method::POST, JSAPI_PATH, Some(&body))?;
        let prepay: PrepayBody = self.send(&signed).await?;
        Ok(PrepayHandle {
            prepay_id: prepay.prepay_id,
        })
    }

    fn client_payment_params(&self, prepay: &PrepayHandle) -> ClientPaymentParams {
        let time_stamp = chrono::Utc::now().timestamp().to_string();
        let nonce_str = signing::nonce();
        let package = format!("prepay_id={}", prepay.prepay_id);
        let pay_sign = self
            .signer
            .pay_sign(&self.config.app_id, &time_stamp, &nonce_str, &package);
        ClientPaymentParams {
            app_id: self.config.app_id.clone(),
            time_stamp,
            nonce_str,
            package,
            sign_type: signing::SIGN_TYPE.to_string(),
            pay_sign,
        }
    }

    #[instrument(skip(self))]
    async fn query_order(&self, order_no: &str) -> Result<OrderQueryResult, GatewayError> {
        let path = format!(
            "{}/{}?mchid={}",
            QUERY_PATH, order_no, self.config.merchant_id
        );
        let signed = self.sign_request(Method::GET, &path, None)?;
        let body: QueryBody = self.send(&signed).await?;
        Ok(OrderQueryResult {
            order_no: body.out_trade_no,
            trade_state: TradeState::parse(&body.trade_state),
            transaction_id: body.transaction_id,
            amount_total: body.amount.and_then(|a| a.total),
        })
    }

    #[instrument(skip(self, request), fields(refund_no = %request.refund_no, order_no = %request.order_no))]
    async fn create_refund(
        &self,
        request: &RefundRequest,
    ) -> Result<RefundAccepted, GatewayError> {
        let refund_minor = to_minor_units(request.refund_amount)?;
        let total_minor = to_minor_units(request.order_amount)?;
        let mut body = json!({
            "out_trade_no": request.order_no,
            "out_refund_no": request.refund_no,
            "reason": request.reason,
            "notify_url": self.config.refund_notify_url,
            "amount": {
                "refund": refund_minor,
                "total": total_minor,
                "currency": CURRENCY,
            },
        });
        if let Some(transaction_id) = &request.transaction_id {
            body["transaction_id"] = json!(transaction_id);
        }
        let signed = self.sign_request(Method::POST, REFUND_PATH, Some(&body))?;
        let accepted: RefundBody = self.send(&signed).await?;
        Ok(RefundAccepted {
            gateway_refund_id: accepted.refund_id,
            status: accepted.status,
        })
    }

    fn parse_payment_notification(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<PaymentNotification, GatewayError> {
        self.verify_callback(headers, body)?;
        decode_payment_notification(body)
    }

    fn parse_refund_notification(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<RefundNotification, GatewayError> {
        self.verify_callback(headers, body)?;
        decode_refund_notification(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> HttpPaymentGateway {
        HttpPaymentGateway::new(GatewayConfig {
            base_url: "https://gateway.test/".into(),
            app_id: "wx-app".into(),
            merchant_id: "1900000001".into(),
            merchant_serial_no: "SERIAL01".into(),
            api_key: "merchant-api-key-0123456789".into(),
            platform_secret: "platform-secret-0123456789".into(),
            notify_url: "https://trips.test/notify".into(),
            refund_notify_url: "https://trips.test/refund-notify".into(),
            request_timeout_secs: 5,
            signature_tolerance_secs: 300,
        })
        .unwrap()
    }

    #[test]
    fn signed_request_joins_base_url_and_keeps_body() {
        let gw = gateway();
        let body = json!({"a": 1});
        let signed = gw.sign_request(Method::POST, JSAPI_PATH, Some(&body)).unwrap();
        assert_eq!(signed.url, "https://gateway.test/v3/pay/transactions/jsapi");
        assert_eq!(signed.body, r#"{"a":1}"#);
        assert!(signed.authorization.contains("serial_no=\"SERIAL01\""));
    }

    #[test]
    fn client_params_are_signed_with_merchant_key() {
        let gw = gateway();
        let params = gw.client_payment_params(&PrepayHandle {
            prepay_id: "wx201410272009395522657a690389285100".into(),
        });
        assert_eq!(params.package, "prepay_id=wx201410272009395522657a690389285100");
        assert_eq!(params.sign_type, "HMAC-SHA256");
        let expected = gw.signer.pay_sign(
            &params.app_id,
            &params.time_stamp,
            &params.nonce_str,
            &params.package,
        );
        assert_eq!(params.pay_sign, expected);
    }

    #[test]
    fn unsigned_callback_is_unauthenticated() {
        let gw = gateway();
        let err = gw
            .parse_payment_notification(&HeaderMap::new(), br#"{"id":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated(_)));
    }
}
