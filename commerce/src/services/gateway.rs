use async_trait::async_trait;
use hmac::{Hmac, Mac};
use marketplace_shared::error::{Error, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct GatewaySession {
    pub gateway_ref: String,
    pub session_url: String,
}

#[derive(Debug, Clone)]
pub struct RefundResult {
    pub gateway_refund_ref: String,
}

/// External payment gateway, abstracted so the coordinator never depends on
/// a specific provider's SDK (grounded in the teacher's `StripeGateway`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, invoice_number: &str, amount_minor: i64, currency: &str) -> Result<GatewaySession>;
    async fn refund(&self, gateway_ref: &str, amount_minor: i64) -> Result<RefundResult>;
}

/// Test/simulated gateway used outside production wiring (spec.md's payments
/// provider is pluggable; this is the one this workspace ships since no real
/// provider credentials are part of the core).
pub struct MockGateway {
    pub base_url: String,
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_session(&self, invoice_number: &str, amount_minor: i64, currency: &str) -> Result<GatewaySession> {
        let gateway_ref = format!("mock_{}", Uuid::new_v4().simple());
        Ok(GatewaySession {
            session_url: format!(
                "{}/pay/{}?invoice={}&amount={}&currency={}",
                self.base_url, gateway_ref, invoice_number, amount_minor, currency
            ),
            gateway_ref,
        })
    }

    async fn refund(&self, gateway_ref: &str, _amount_minor: i64) -> Result<RefundResult> {
        Ok(RefundResult {
            gateway_refund_ref: format!("refund_{}_{}", gateway_ref, Uuid::new_v4().simple()),
        })
    }
}

/// Real HTTP-backed gateway, used when `payments.test_mode` is off and a
/// provider base URL + API key are configured. Grounded in the teacher's
/// `StripeGateway` reqwest-client shape.
pub struct HttpGateway {
    pub base_url: String,
    pub api_key: String,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self { base_url, api_key, client: reqwest::Client::new() }
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_session(&self, invoice_number: &str, amount_minor: i64, currency: &str) -> Result<GatewaySession> {
        let response = self
            .client
            .post(format!("{}/v1/sessions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "reference": invoice_number,
                "amount": amount_minor,
                "currency": currency,
            }))
            .send()
            .await
            .map_err(|err| Error::GatewayUnavailable(err.to_string()))?
            .error_for_status()
            .map_err(|err| Error::GatewayUnavailable(err.to_string()))?
            .json::<SessionResponse>()
            .await
            .map_err(|err| Error::GatewayUnavailable(err.to_string()))?;

        Ok(GatewaySession { gateway_ref: response.id, session_url: response.url })
    }

    async fn refund(&self, gateway_ref: &str, amount_minor: i64) -> Result<RefundResult> {
        let response = self
            .client
            .post(format!("{}/v1/refunds", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "gateway_ref": gateway_ref,
                "amount": amount_minor,
            }))
            .send()
            .await
            .map_err(|err| Error::GatewayUnavailable(err.to_string()))?
            .error_for_status()
            .map_err(|err| Error::GatewayUnavailable(err.to_string()))?
            .json::<RefundResponse>()
            .await
            .map_err(|err| Error::GatewayUnavailable(err.to_string()))?;

        Ok(RefundResult { gateway_refund_ref: response.id })
    }
}

/// Verifies the raw webhook body against a shared secret. Accepts any of the
/// three formats spec.md §4.H names: `sha256=<hex>`, a comma-separated
/// `v1=<hex>` list, or a bare 64-char hex digest.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature_header: &str) -> Result<()> {
    let expected = compute_hmac_hex(secret, body);

    let candidates: Vec<&str> = if let Some(stripped) = signature_header.strip_prefix("sha256=") {
        vec![stripped]
    } else if signature_header.contains("v1=") {
        signature_header
            .split(',')
            .filter_map(|part| part.trim().strip_prefix("v1="))
            .collect()
    } else {
        vec![signature_header.trim()]
    };

    let matches = candidates
        .iter()
        .any(|candidate| constant_time_eq(candidate.as_bytes(), expected.as_bytes()));

    if matches {
        Ok(())
    } else {
        Err(Error::unauthorized("PAY_WEBHOOK_INVALID_SIGNATURE", "webhook signature verification failed"))
    }
}

fn compute_hmac_hex(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn to_minor_units(amount: Decimal) -> i64 {
    marketplace_shared::money::to_minor_units(amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[rstest]
    #[case::sha256_prefixed(|sig: &str| format!("sha256={}", sig))]
    #[case::v1_csv(|sig: &str| format!("t=1700000000,v1={},v0=stale", sig))]
    #[case::raw_hex(|sig: &str| sig.to_string())]
    fn accepted_signature_formats_verify(#[case] format_header: fn(&str) -> String) {
        let secret = "whsec_test";
        let body = b"payload";
        let sig = compute_hmac_hex(secret, body);
        let header = format_header(&sig);
        assert!(verify_webhook_signature(secret, body, &header).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let secret = "whsec_test";
        let sig = compute_hmac_hex(secret, b"original");
        let header = format!("sha256={}", sig);
        let err = verify_webhook_signature(secret, b"tampered", &header).unwrap_err();
        assert_eq!(err.code(), "PAY_WEBHOOK_INVALID_SIGNATURE");
    }

    #[tokio::test]
    async fn mock_gateway_satisfies_trait_object() {
        let mut mock = MockPaymentGateway::new();
        mock.expect_create_session().returning(|invoice_number, amount_minor, currency| {
            Ok(GatewaySession {
                gateway_ref: format!("evt_{}", invoice_number),
                session_url: format!("https://pay.test/{}/{}", amount_minor, currency),
            })
        });
        let gateway: Box<dyn PaymentGateway> = Box::new(mock);

        let session = gateway.create_session("INV-2026-000001", 15000, "SAR").await.expect("mock gateway call succeeds");
        assert_eq!(session.gateway_ref, "evt_INV-2026-000001");
    }

    #[tokio::test]
    async fn http_gateway_creates_session_against_mock_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "evt_abc123",
                "url": "https://pay.example/session/evt_abc123",
            })))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(server.uri(), "sk_test".to_string());
        let session = gateway.create_session("INV-2026-000002", 2500, "SAR").await.unwrap();

        assert_eq!(session.gateway_ref, "evt_abc123");
        assert_eq!(session.session_url, "https://pay.example/session/evt_abc123");
    }

    #[tokio::test]
    async fn http_gateway_surfaces_gateway_unavailable_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(server.uri(), "sk_test".to_string());
        let err = gateway.create_session("INV-2026-000003", 2500, "SAR").await.unwrap_err();
        assert!(matches!(err, Error::GatewayUnavailable(_)));
    }
}
