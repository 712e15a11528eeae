//! Checkout preference issuance
//!
//! Runs synchronously in the registration flow: builds a payment preference
//! for the requested plan, embeds the correlation token the notification
//! pipeline later depends on, registers it with the provider, and hands back
//! the redirect URL.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use vitrina_shared::{is_valid_email, Plan};

use crate::client::{
    BackUrls, CreatePreference, MercadoPagoClient, PreferenceItem, PreferencePayer,
};
use crate::error::{PaymentError, PaymentResult};
use crate::resolver::{CorrelationToken, DEFAULT_UNRESOLVED_PLAN};

/// Sales channel recorded in the correlation token.
const CHECKOUT_CHANNEL: &str = "web";

/// Default listing prices per plan, in the account currency. Overridable per
/// request via `unit_price`.
#[derive(Debug, Clone)]
pub struct PlanPrices {
    pub basic: f64,
    pub pro: f64,
    pub premium: f64,
}

impl Default for PlanPrices {
    fn default() -> Self {
        Self {
            basic: 1499.0,
            pro: 2999.0,
            premium: 4999.0,
        }
    }
}

impl PlanPrices {
    pub fn price_for(&self, plan: Plan) -> f64 {
        match plan {
            Plan::Free => 0.0,
            Plan::Basic => self.basic,
            Plan::Pro => self.pro,
            Plan::Premium => self.premium,
        }
    }
}

/// Checkout configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Redirect targets the provider sends the buyer back to.
    pub success_url: String,
    pub failure_url: String,
    pub pending_url: String,
    /// Where the provider delivers payment notifications.
    pub notification_url: Option<String>,
    pub prices: PlanPrices,
}

impl CheckoutConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let success_url = std::env::var("CHECKOUT_SUCCESS_URL")
            .map_err(|_| PaymentError::Internal("CHECKOUT_SUCCESS_URL not set".to_string()))?;
        let failure_url = std::env::var("CHECKOUT_FAILURE_URL")
            .map_err(|_| PaymentError::Internal("CHECKOUT_FAILURE_URL not set".to_string()))?;
        let pending_url = std::env::var("CHECKOUT_PENDING_URL")
            .map_err(|_| PaymentError::Internal("CHECKOUT_PENDING_URL not set".to_string()))?;

        let price_override = |var: &str, default: f64| {
            std::env::var(var)
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(default)
        };
        let defaults = PlanPrices::default();

        Ok(Self {
            success_url,
            failure_url,
            pending_url,
            notification_url: std::env::var("MP_NOTIFICATION_URL").ok(),
            prices: PlanPrices {
                basic: price_override("MP_PRICE_BASIC", defaults.basic),
                pro: price_override("MP_PRICE_PRO", defaults.pro),
                premium: price_override("MP_PRICE_PREMIUM", defaults.premium),
            },
        })
    }

    /// The provider rejects auto_return when the success URL is not served
    /// over a secure transport.
    fn auto_return(&self) -> Option<String> {
        self.success_url
            .starts_with("https://")
            .then(|| "approved".to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub email: String,
    pub plan: String,
    pub unit_price: Option<f64>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRedirect {
    pub preference_id: String,
    /// The non-sandbox URL when the provider returns both.
    pub redirect_url: String,
}

pub struct CheckoutService {
    client: MercadoPagoClient,
    config: CheckoutConfig,
}

impl CheckoutService {
    pub fn new(client: MercadoPagoClient, config: CheckoutConfig) -> Self {
        Self { client, config }
    }

    /// Register a preference and return where to send the buyer.
    pub async fn create_checkout(&self, request: CheckoutRequest) -> PaymentResult<CheckoutRedirect> {
        let email = request.email.trim().to_string();
        if !is_valid_email(&email) {
            return Err(PaymentError::InvalidRequest(format!(
                "invalid email: {email}"
            )));
        }

        let plan = resolve_requested_plan(&request.plan);
        let unit_price = request
            .unit_price
            .unwrap_or_else(|| self.config.prices.price_for(plan));
        let title = request
            .title
            .unwrap_or_else(|| format!("Vitrina listing - {plan} plan"));

        let token = CorrelationToken::new(&email, plan, CHECKOUT_CHANNEL);

        let preference = CreatePreference {
            items: vec![PreferenceItem {
                title,
                quantity: 1,
                unit_price,
            }],
            payer: PreferencePayer {
                email: email.clone(),
            },
            back_urls: BackUrls {
                success: self.config.success_url.clone(),
                failure: self.config.failure_url.clone(),
                pending: self.config.pending_url.clone(),
            },
            auto_return: self.config.auto_return(),
            notification_url: self.config.notification_url.clone(),
            external_reference: token.encode(),
        };

        let response = self.client.create_preference(&preference).await?;

        let preference_id = response.id.clone().unwrap_or_default();
        let redirect_url = response
            .init_point
            .or(response.sandbox_init_point)
            .ok_or_else(|| {
                PaymentError::Internal("preference response carried no init_point".to_string())
            })?;

        tracing::info!(
            email = %email,
            plan = %plan,
            unit_price,
            preference_id = %preference_id,
            "Checkout preference created"
        );

        Ok(CheckoutRedirect {
            preference_id,
            redirect_url,
        })
    }
}

/// Parse the requested plan, falling back to the documented default rather
/// than rejecting the registration.
fn resolve_requested_plan(raw: &str) -> Plan {
    match Plan::from_str(raw) {
        Ok(plan) => plan,
        Err(_) => {
            tracing::warn!(
                requested = %raw,
                fallback = %DEFAULT_UNRESOLVED_PLAN,
                "Unrecognized plan in checkout request"
            );
            DEFAULT_UNRESOLVED_PLAN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MercadoPagoConfig;
    use std::time::Duration;

    fn config(success_url: &str) -> CheckoutConfig {
        CheckoutConfig {
            success_url: success_url.to_string(),
            failure_url: "https://vitrina.example/pago/error".to_string(),
            pending_url: "https://vitrina.example/pago/pendiente".to_string(),
            notification_url: Some("https://vitrina.example/api/webhooks/mercadopago".to_string()),
            prices: PlanPrices::default(),
        }
    }

    fn service(base_url: String, success_url: &str) -> CheckoutService {
        let client = MercadoPagoClient::new(MercadoPagoConfig {
            access_token: "TEST-token".to_string(),
            base_url,
            timeout: Duration::from_secs(2),
        })
        .unwrap();
        CheckoutService::new(client, config(success_url))
    }

    #[test]
    fn plan_price_table_resolves_defaults() {
        let prices = PlanPrices::default();
        assert_eq!(prices.price_for(Plan::Pro), 2999.0);
        assert_eq!(prices.price_for(Plan::Free), 0.0);
        assert!(prices.price_for(Plan::Premium) > prices.price_for(Plan::Basic));
    }

    #[test]
    fn unknown_plan_falls_back_to_default() {
        assert_eq!(resolve_requested_plan("gold"), DEFAULT_UNRESOLVED_PLAN);
        assert_eq!(resolve_requested_plan("pro"), Plan::Pro);
    }

    #[test]
    fn auto_return_requires_secure_success_url() {
        assert_eq!(
            config("https://vitrina.example/pago/ok").auto_return(),
            Some("approved".to_string())
        );
        assert_eq!(config("http://localhost:3000/pago/ok").auto_return(), None);
    }

    #[tokio::test]
    async fn issues_preference_with_default_price_and_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/checkout/preferences")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::PartialJsonString(
                    r#"{"external_reference": "a@b.com|pro|web"}"#.to_string(),
                ),
                mockito::Matcher::PartialJsonString(
                    r#"{"items": [{"quantity": 1, "unit_price": 2999.0}]}"#.to_string(),
                ),
            ]))
            .with_status(201)
            .with_body(
                r#"{"id": "123-abc",
                    "init_point": "https://www.mercadopago.com/checkout/v1/redirect?pref_id=123-abc",
                    "sandbox_init_point": "https://sandbox.mercadopago.com/checkout/v1/redirect?pref_id=123-abc"}"#,
            )
            .create_async()
            .await;

        let service = service(server.url(), "https://vitrina.example/pago/ok");
        let redirect = service
            .create_checkout(CheckoutRequest {
                email: "a@b.com".to_string(),
                plan: "pro".to_string(),
                unit_price: None,
                title: None,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(redirect.preference_id, "123-abc");
        assert!(redirect.redirect_url.starts_with("https://www.mercadopago.com/"));
    }

    #[tokio::test]
    async fn sandbox_url_is_used_only_when_alone() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/checkout/preferences")
            .with_status(201)
            .with_body(
                r#"{"id": "9", "sandbox_init_point": "https://sandbox.mercadopago.com/x"}"#,
            )
            .create_async()
            .await;

        let service = service(server.url(), "https://vitrina.example/pago/ok");
        let redirect = service
            .create_checkout(CheckoutRequest {
                email: "a@b.com".to_string(),
                plan: "premium".to_string(),
                unit_price: None,
                title: None,
            })
            .await
            .unwrap();

        assert_eq!(redirect.redirect_url, "https://sandbox.mercadopago.com/x");
    }

    #[tokio::test]
    async fn rejects_malformed_email_before_any_call() {
        let service = service("http://127.0.0.1:1".to_string(), "https://x.example/ok");
        let err = service
            .create_checkout(CheckoutRequest {
                email: "not-an-email".to_string(),
                plan: "pro".to_string(),
                unit_price: None,
                title: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::InvalidRequest(_)));
    }
}
