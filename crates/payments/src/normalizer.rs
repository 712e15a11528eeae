//! Event normalization
//!
//! Turns a classified notification into one canonical [`PaymentOutcome`],
//! querying the provider's read API when the notification is only a pointer.
//! Any fetch failure here is reported as `PaymentNotFetched` so the sender
//! re-delivers later; the pipeline never treats an unreadable payment as a
//! declined one.

use crate::client::{MercadoPagoClient, MpPayment, OrderPayment};
use crate::error::{PaymentError, PaymentResult};
use crate::notification::NotificationKind;

/// Status literal that triggers state change. Everything else is
/// acknowledged and ignored.
pub const APPROVED: &str = "approved";

/// Normalized result of one notification. In-memory projection only; never
/// persisted verbatim.
#[derive(Debug, Clone, Default)]
pub struct PaymentOutcome {
    /// Provider payment id, absent for inline simulation payloads.
    pub payment_id: Option<String>,
    /// Free-text provider status.
    pub status: String,
    /// Payer's billing email as reported by the provider.
    pub payer_email: Option<String>,
    /// Subscriber email from provider-side metadata.
    pub metadata_email: Option<String>,
    /// Plan from provider-side metadata, unparsed.
    pub metadata_plan: Option<String>,
    /// Raw correlation token (`external_reference`), unparsed.
    pub external_reference: Option<String>,
    pub date_created: Option<String>,
    pub date_approved: Option<String>,
}

impl PaymentOutcome {
    pub fn is_approved(&self) -> bool {
        self.status == APPROVED
    }

    /// Label for logs when the payment id is absent.
    pub fn payment_ref(&self) -> &str {
        self.payment_id.as_deref().unwrap_or("(inline)")
    }
}

/// Pick the payment to follow out of a merchant order: the approved one if
/// present, else the first.
pub fn select_order_payment(payments: &[OrderPayment]) -> Option<&OrderPayment> {
    payments
        .iter()
        .find(|p| p.status.as_deref() == Some(APPROVED))
        .or_else(|| payments.first())
}

pub struct EventNormalizer {
    client: MercadoPagoClient,
}

impl EventNormalizer {
    pub fn new(client: MercadoPagoClient) -> Self {
        Self { client }
    }

    /// Resolve a classified notification into a canonical outcome.
    pub async fn normalize(&self, kind: NotificationKind) -> PaymentResult<PaymentOutcome> {
        match kind {
            NotificationKind::InlineMetadata {
                status,
                email,
                plan,
                external_reference,
            } => Ok(PaymentOutcome {
                payment_id: None,
                status,
                payer_email: None,
                metadata_email: Some(email),
                metadata_plan: plan,
                external_reference,
                date_created: None,
                date_approved: None,
            }),

            NotificationKind::OrderReference { order_id } => {
                let order = self
                    .client
                    .get_merchant_order(&order_id)
                    .await
                    .map_err(|e| not_fetched(&order_id, e))?
                    .ok_or_else(|| PaymentError::PaymentNotFetched(format!("order {order_id}")))?;

                let payment_id = select_order_payment(&order.payments)
                    .and_then(|p| p.id)
                    .ok_or_else(|| {
                        PaymentError::PaymentNotFetched(format!("order {order_id} has no payments"))
                    })?;

                self.fetch_payment(&payment_id.to_string()).await
            }

            NotificationKind::PaymentReference { payment_id } => {
                self.fetch_payment(&payment_id).await
            }
        }
    }

    async fn fetch_payment(&self, payment_id: &str) -> PaymentResult<PaymentOutcome> {
        let payment = self
            .client
            .get_payment(payment_id)
            .await
            .map_err(|e| not_fetched(payment_id, e))?
            .ok_or_else(|| PaymentError::PaymentNotFetched(payment_id.to_string()))?;

        Ok(outcome_from_payment(payment_id, payment))
    }
}

fn outcome_from_payment(payment_id: &str, payment: MpPayment) -> PaymentOutcome {
    let metadata_str = |key: &str| {
        payment
            .metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    let metadata_email = metadata_str("email");
    let metadata_plan = metadata_str("plan");

    PaymentOutcome {
        metadata_email,
        metadata_plan,
        payment_id: Some(
            payment
                .id
                .map(|id| id.to_string())
                .unwrap_or_else(|| payment_id.to_string()),
        ),
        status: payment.status.unwrap_or_default(),
        payer_email: payment.payer.and_then(|p| p.email),
        external_reference: payment.external_reference,
        date_created: payment.date_created,
        date_approved: payment.date_approved,
    }
}

fn not_fetched(id: &str, source: PaymentError) -> PaymentError {
    match source {
        // Already classified at a lower level; keep the more specific variant.
        e @ PaymentError::PaymentNotFetched(_) => e,
        e => {
            tracing::warn!(payment_id = %id, error = %e, "Provider read failed");
            PaymentError::PaymentNotFetched(id.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MercadoPagoConfig, OrderPayment};
    use std::time::Duration;

    fn client_for(base_url: String) -> MercadoPagoClient {
        MercadoPagoClient::new(MercadoPagoConfig {
            access_token: "TEST-token".to_string(),
            base_url,
            timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    fn order_payment(id: i64, status: &str) -> OrderPayment {
        OrderPayment {
            id: Some(id),
            status: Some(status.to_string()),
        }
    }

    #[test]
    fn selects_approved_payment_over_first() {
        let payments = vec![order_payment(100, "pending"), order_payment(101, "approved")];
        assert_eq!(select_order_payment(&payments).and_then(|p| p.id), Some(101));
    }

    #[test]
    fn falls_back_to_first_payment_when_none_approved() {
        let payments = vec![order_payment(100, "pending"), order_payment(101, "rejected")];
        assert_eq!(select_order_payment(&payments).and_then(|p| p.id), Some(100));
    }

    #[test]
    fn empty_order_selects_nothing() {
        assert!(select_order_payment(&[]).is_none());
    }

    #[tokio::test]
    async fn inline_metadata_skips_upstream() {
        // Client pointed at a dead port: any upstream call would error.
        let normalizer = EventNormalizer::new(client_for("http://127.0.0.1:1".to_string()));

        let outcome = normalizer
            .normalize(NotificationKind::InlineMetadata {
                status: "approved".to_string(),
                email: "a@b.com".to_string(),
                plan: Some("pro".to_string()),
                external_reference: None,
            })
            .await
            .unwrap();

        assert!(outcome.is_approved());
        assert_eq!(outcome.metadata_email.as_deref(), Some("a@b.com"));
        assert_eq!(outcome.metadata_plan.as_deref(), Some("pro"));
        assert!(outcome.payment_id.is_none());
    }

    #[tokio::test]
    async fn unreachable_provider_reports_not_fetched() {
        let normalizer = EventNormalizer::new(client_for("http://127.0.0.1:1".to_string()));

        let err = normalizer
            .normalize(NotificationKind::PaymentReference {
                payment_id: "123".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::PaymentNotFetched(_)));
    }

    #[tokio::test]
    async fn missing_payment_reports_not_fetched() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/payments/42")
            .with_status(404)
            .create_async()
            .await;

        let normalizer = EventNormalizer::new(client_for(server.url()));
        let err = normalizer
            .normalize(NotificationKind::PaymentReference {
                payment_id: "42".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::PaymentNotFetched(_)));
    }

    #[tokio::test]
    async fn order_reference_follows_approved_payment() {
        let mut server = mockito::Server::new_async().await;
        let _order = server
            .mock("GET", "/merchant_orders/31")
            .with_status(200)
            .with_body(
                r#"{"id": 31, "payments": [
                    {"id": 100, "status": "pending"},
                    {"id": 101, "status": "approved"}
                ]}"#,
            )
            .create_async()
            .await;
        let _payment = server
            .mock("GET", "/v1/payments/101")
            .with_status(200)
            .with_body(
                r#"{"id": 101, "status": "approved",
                    "external_reference": "a@b.com|premium|web",
                    "payer": {"email": "a@b.com"}}"#,
            )
            .create_async()
            .await;

        let normalizer = EventNormalizer::new(client_for(server.url()));
        let outcome = normalizer
            .normalize(NotificationKind::OrderReference {
                order_id: "31".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(outcome.payment_id.as_deref(), Some("101"));
        assert!(outcome.is_approved());
        assert_eq!(
            outcome.external_reference.as_deref(),
            Some("a@b.com|premium|web")
        );
    }

    #[tokio::test]
    async fn order_without_payments_reports_not_fetched() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/merchant_orders/7")
            .with_status(200)
            .with_body(r#"{"id": 7, "payments": []}"#)
            .create_async()
            .await;

        let normalizer = EventNormalizer::new(client_for(server.url()));
        let err = normalizer
            .normalize(NotificationKind::OrderReference {
                order_id: "7".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::PaymentNotFetched(_)));
    }

    #[test]
    fn non_approved_status_is_preserved() {
        let outcome = PaymentOutcome {
            status: "in_process".to_string(),
            ..Default::default()
        };
        assert!(!outcome.is_approved());
        assert_eq!(outcome.status, "in_process");
    }
}
