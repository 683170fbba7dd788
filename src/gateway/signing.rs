//! HMAC-SHA256 signing for gateway requests, responses and callbacks.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use http::HeaderMap;
use rand::{distributions::Alphanumeric, Rng};
use sha2::Sha256;

use super::GatewayError;

type HmacSha256 = Hmac<Sha256>;

pub const AUTH_SCHEME: &str = "MOBILEPAY-HMAC-SHA256";
pub const SIGN_TYPE: &str = "HMAC-SHA256";
pub const TIMESTAMP_HEADER: &str = "mobilepay-timestamp";
pub const NONCE_HEADER: &str = "mobilepay-nonce";
pub const SIGNATURE_HEADER: &str = "mobilepay-signature";

/// base64(HMAC-SHA256(key, message))
pub fn hmac_base64(key: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Random 32-character alphanumeric nonce.
pub fn nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Canonical message for an outbound request. `path_and_query` excludes scheme and host.
pub fn request_message(
    method: &str,
    path_and_query: &str,
    timestamp: i64,
    nonce: &str,
    body: &str,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n",
        method, path_and_query, timestamp, nonce, body
    )
}

/// Canonical message for a gateway response or callback.
pub fn response_message(timestamp: &str, nonce: &str, body: &str) -> String {
    format!("{}\n{}\n{}\n", timestamp, nonce, body)
}

/// Signs outbound requests with the merchant key.
#[derive(Clone)]
pub struct RequestSigner {
    merchant_id: String,
    serial_no: String,
    api_key: String,
}

impl RequestSigner {
    pub fn new(merchant_id: String, serial_no: String, api_key: String) -> Self {
        Self {
            merchant_id,
            serial_no,
            api_key,
        }
    }

    /// Builds the `Authorization` header value for one request.
    pub fn authorization(
        &self,
        method: &str,
        path_and_query: &str,
        timestamp: i64,
        nonce: &str,
        body: &str,
    ) -> String {
        let signature = hmac_base64(
            &self.api_key,
            &request_message(method, path_and_query, timestamp, nonce, body),
        );
        format!(
            "{} mchid=\"{}\",nonce_str=\"{}\",timestamp=\"{}\",serial_no=\"{}\",signature=\"{}\"",
            AUTH_SCHEME, self.merchant_id, nonce, timestamp, self.serial_no, signature
        )
    }

    /// Signature the client SDK presents when completing a charge.
    pub fn pay_sign(&self, app_id: &str, timestamp: &str, nonce: &str, package: &str) -> String {
        hmac_base64(
            &self.api_key,
            &format!("{}\n{}\n{}\n{}\n", app_id, timestamp, nonce, package),
        )
    }
}

/// Signature the gateway attaches to responses and callbacks.
pub fn platform_signature(secret: &str, timestamp: &str, nonce: &str, body: &str) -> String {
    hmac_base64(secret, &response_message(timestamp, nonce, body))
}

/// Verifies the platform signature headers over `body`.
///
/// `now` is unix seconds; the timestamp header must be within `tolerance_secs` of it.
pub fn verify_platform_signature(
    headers: &HeaderMap,
    body: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| format!("missing {} header", name))
    };
    let timestamp = header(TIMESTAMP_HEADER)?;
    let nonce = header(NONCE_HEADER)?;
    let signature = header(SIGNATURE_HEADER)?;

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| "timestamp is not an integer".to_string())?;
    if (now - ts).unsigned_abs() > tolerance_secs {
        return Err("timestamp outside tolerance".to_string());
    }

    let body = std::str::from_utf8(body).map_err(|_| "body is not utf-8".to_string())?;
    let expected = platform_signature(secret, &timestamp, &nonce, body);
    if constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
        Ok(())
    } else {
        Err("signature mismatch".to_string())
    }
}

/// Callback variant of [`verify_platform_signature`].
pub fn verify_callback(
    headers: &HeaderMap,
    body: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), GatewayError> {
    verify_platform_signature(headers, body, secret, tolerance_secs, now)
        .map_err(GatewayError::Unauthenticated)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.iter().zip(b) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    const SECRET: &str = "platform-secret-0123456789";

    fn signed_headers(ts: i64, nonce: &str, body: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let ts = ts.to_string();
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_str(&ts).unwrap());
        headers.insert(NONCE_HEADER, HeaderValue::from_str(nonce).unwrap());
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&platform_signature(SECRET, &ts, nonce, body)).unwrap(),
        );
        headers
    }

    #[test]
    fn authorization_is_deterministic_for_same_inputs() {
        let signer = RequestSigner::new("1900000001".into(), "SERIAL01".into(), "key".into());
        let a = signer.authorization("POST", "/v3/pay/transactions/jsapi", 1700000000, "abc", "{}");
        let b = signer.authorization("POST", "/v3/pay/transactions/jsapi", 1700000000, "abc", "{}");
        assert_eq!(a, b);
        assert!(a.starts_with("MOBILEPAY-HMAC-SHA256 mchid=\"1900000001\",nonce_str=\"abc\""));

        let other = signer.authorization("POST", "/v3/pay/transactions/jsapi", 1700000000, "abc", "{ }");
        assert_ne!(a, other);
    }

    #[test]
    fn request_message_layout() {
        assert_eq!(
            request_message("GET", "/v3/x?mchid=1", 12, "n", ""),
            "GET\n/v3/x?mchid=1\n12\nn\n\n"
        );
    }

    #[test]
    fn verifies_good_signature() {
        let body = r#"{"id":"evt"}"#;
        let headers = signed_headers(1_700_000_000, "nonce1", body);
        assert!(
            verify_platform_signature(&headers, body.as_bytes(), SECRET, 300, 1_700_000_100)
                .is_ok()
        );
    }

    #[test]
    fn rejects_tampered_body_and_stale_timestamp() {
        let body = r#"{"id":"evt"}"#;
        let headers = signed_headers(1_700_000_000, "nonce1", body);
        assert!(verify_platform_signature(
            &headers,
            br#"{"id":"evt2"}"#,
            SECRET,
            300,
            1_700_000_000
        )
        .is_err());
        assert!(
            verify_platform_signature(&headers, body.as_bytes(), SECRET, 300, 1_700_001_000)
                .is_err()
        );
    }

    #[test]
    fn missing_headers_fail_as_unauthenticated() {
        let err = verify_callback(&HeaderMap::new(), b"{}", SECRET, 300, 0).unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated(_)));
    }

    #[test]
    fn nonce_is_alphanumeric() {
        let n = nonce();
        assert_eq!(n.len(), 32);
        assert!(n.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
