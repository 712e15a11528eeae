//! MercadoPago API client
//!
//! Thin wrapper over the provider's REST API. Three calls are used by this
//! crate: preference creation (checkout), payment read, and merchant-order
//! read. Every request carries the bearer token from configuration and a
//! bounded timeout; a request that outlives the timeout surfaces as
//! `UpstreamUnavailable`, never hangs the pipeline.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, PaymentResult};

/// Provider configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    /// Bearer token for the provider's REST API.
    pub access_token: String,
    /// API origin. Overridable for tests.
    pub base_url: String,
    /// Timeout applied to every outbound call.
    pub timeout: Duration,
}

impl MercadoPagoConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let access_token = std::env::var("MP_ACCESS_TOKEN")
            .map_err(|_| PaymentError::Internal("MP_ACCESS_TOKEN not set".to_string()))?;
        let base_url = std::env::var("MP_BASE_URL")
            .unwrap_or_else(|_| "https://api.mercadopago.com".to_string());

        Ok(Self {
            access_token,
            base_url,
            timeout: Duration::from_secs(5),
        })
    }
}

/// Payment resource as returned by `GET /v1/payments/{id}`.
///
/// Only the fields reconciliation reads are modeled; everything else is
/// ignored on deserialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MpPayment {
    pub id: Option<i64>,
    pub status: Option<String>,
    pub external_reference: Option<String>,
    pub payer: Option<MpPayer>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub date_created: Option<String>,
    pub date_approved: Option<String>,
    pub transaction_amount: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MpPayer {
    pub email: Option<String>,
}

/// Merchant order as returned by `GET /merchant_orders/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MerchantOrder {
    pub id: Option<i64>,
    #[serde(default)]
    pub payments: Vec<OrderPayment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderPayment {
    pub id: Option<i64>,
    pub status: Option<String>,
}

/// Request body for `POST /checkout/preferences`.
#[derive(Debug, Clone, Serialize)]
pub struct CreatePreference {
    pub items: Vec<PreferenceItem>,
    pub payer: PreferencePayer,
    pub back_urls: BackUrls,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_return: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_url: Option<String>,
    pub external_reference: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreferenceItem {
    pub title: String,
    pub quantity: u32,
    pub unit_price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreferencePayer {
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreferenceResponse {
    pub id: Option<String>,
    pub init_point: Option<String>,
    pub sandbox_init_point: Option<String>,
}

/// Client handle. Cheap to clone; the inner reqwest client is shared.
#[derive(Clone)]
pub struct MercadoPagoClient {
    http: reqwest::Client,
    config: MercadoPagoConfig,
}

impl MercadoPagoClient {
    pub fn new(config: MercadoPagoConfig) -> PaymentResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Internal(format!("http client: {e}")))?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MercadoPagoConfig::from_env()?)
    }

    pub fn config(&self) -> &MercadoPagoConfig {
        &self.config
    }

    /// Fetch a payment by id. `Ok(None)` means the provider answered but has
    /// no such payment (or no body); transport failures and 5xx are
    /// `UpstreamUnavailable`.
    pub async fn get_payment(&self, payment_id: &str) -> PaymentResult<Option<MpPayment>> {
        let url = format!("{}/v1/payments/{}", self.config.base_url, payment_id);
        self.get_json(&url).await
    }

    /// Fetch a merchant order by id. Same non-2xx tolerance as
    /// [`get_payment`](Self::get_payment).
    pub async fn get_merchant_order(&self, order_id: &str) -> PaymentResult<Option<MerchantOrder>> {
        let url = format!("{}/merchant_orders/{}", self.config.base_url, order_id);
        self.get_json(&url).await
    }

    /// Register a checkout preference with the provider.
    pub async fn create_preference(
        &self,
        preference: &CreatePreference,
    ) -> PaymentResult<PreferenceResponse> {
        let url = format!("{}/checkout/preferences", self.config.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(preference)
            .send()
            .await
            .map_err(|e| PaymentError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::UpstreamUnavailable(e.to_string()))?;

        if status.is_client_error() {
            // e.g. malformed back_urls, auto_return without a secure success URL
            return Err(PaymentError::InvalidRequest(format!(
                "preference rejected ({status}): {body}"
            )));
        }
        if !status.is_success() {
            return Err(PaymentError::UpstreamUnavailable(format!(
                "preference creation failed ({status})"
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| PaymentError::Internal(format!("preference response parse: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> PaymentResult<Option<T>> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| PaymentError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(PaymentError::UpstreamUnavailable(format!(
                "GET {url} answered {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::UpstreamUnavailable(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| PaymentError::Internal(format!("GET {url} parse: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(base_url: String) -> MercadoPagoConfig {
        MercadoPagoConfig {
            access_token: "TEST-token".to_string(),
            base_url,
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn fetches_payment_fields() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/payments/1234567")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "id": 1234567,
                    "status": "approved",
                    "external_reference": "a@b.com|premium|web",
                    "payer": {"email": "payer@b.com"},
                    "metadata": {"plan": "premium"},
                    "transaction_amount": 4999.0
                }"#,
            )
            .create_async()
            .await;

        let client = MercadoPagoClient::new(test_config(server.url())).unwrap();
        let payment = client.get_payment("1234567").await.unwrap().unwrap();

        assert_eq!(payment.id, Some(1234567));
        assert_eq!(payment.status.as_deref(), Some("approved"));
        assert_eq!(
            payment.external_reference.as_deref(),
            Some("a@b.com|premium|web")
        );
        assert_eq!(
            payment.payer.and_then(|p| p.email).as_deref(),
            Some("payer@b.com")
        );
    }

    #[tokio::test]
    async fn missing_payment_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/payments/999")
            .with_status(404)
            .with_body(r#"{"message":"Payment not found"}"#)
            .create_async()
            .await;

        let client = MercadoPagoClient::new(test_config(server.url())).unwrap();
        assert!(client.get_payment("999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_body_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/payments/77")
            .with_status(200)
            .with_body("")
            .create_async()
            .await;

        let client = MercadoPagoClient::new(test_config(server.url())).unwrap();
        assert!(client.get_payment("77").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_error_is_upstream_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/payments/55")
            .with_status(500)
            .create_async()
            .await;

        let client = MercadoPagoClient::new(test_config(server.url())).unwrap();
        let err = client.get_payment("55").await.unwrap_err();
        assert!(matches!(err, PaymentError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn preference_client_error_is_invalid_request() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/checkout/preferences")
            .with_status(400)
            .with_body(r#"{"message":"invalid auto_return"}"#)
            .create_async()
            .await;

        let client = MercadoPagoClient::new(test_config(server.url())).unwrap();
        let preference = CreatePreference {
            items: vec![PreferenceItem {
                title: "Plan premium".to_string(),
                quantity: 1,
                unit_price: 4999.0,
            }],
            payer: PreferencePayer {
                email: "a@b.com".to_string(),
            },
            back_urls: BackUrls {
                success: "http://localhost/ok".to_string(),
                failure: "http://localhost/fail".to_string(),
                pending: "http://localhost/pending".to_string(),
            },
            auto_return: None,
            notification_url: None,
            external_reference: "a@b.com|premium|web".to_string(),
        };

        let err = client.create_preference(&preference).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn merchant_order_payments_deserialize() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/merchant_orders/31")
            .with_status(200)
            .with_body(
                r#"{
                    "id": 31,
                    "payments": [
                        {"id": 100, "status": "pending"},
                        {"id": 101, "status": "approved"}
                    ]
                }"#,
            )
            .create_async()
            .await;

        let client = MercadoPagoClient::new(test_config(server.url())).unwrap();
        let order = client.get_merchant_order("31").await.unwrap().unwrap();
        assert_eq!(order.payments.len(), 2);
        assert_eq!(order.payments[1].status.as_deref(), Some("approved"));
    }
}
