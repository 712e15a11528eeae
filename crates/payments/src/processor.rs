//! Notification processing pipeline
//!
//! One inbound delivery runs Receiver → Normalizer → Resolver → Reconciler in
//! sequence and ends in exactly one terminal state. The pipeline swallows and
//! classifies every downstream failure: the only errors that escape to the
//! HTTP boundary are `AuthRejected` (the sender failed the shared-secret
//! check) and `PaymentNotFetched` (the sender should re-deliver). Everything
//! else is acknowledged so the provider stops retrying.

use std::collections::HashMap;

use sqlx::PgPool;

use crate::client::MercadoPagoClient;
use crate::error::{PaymentError, PaymentResult};
use crate::normalizer::EventNormalizer;
use crate::notification::{authenticate, classify, WebhookCredentials};
use crate::reconciler::StateReconciler;
use crate::resolver::resolve_identity;

/// One inbound webhook delivery, transport details already stripped.
#[derive(Debug, Clone, Default)]
pub struct WebhookDelivery {
    /// Where it came from, for the raw log ("mercadopago").
    pub source: String,
    pub body: Option<serde_json::Value>,
    pub query: HashMap<String, String>,
    pub credentials: WebhookCredentials,
}

/// Why an acknowledged notification did not change any state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Status other than "approved". Expected, not an error.
    NotApproved { status: String },
    /// Approved payment with no usable email. Needs manual reconciliation.
    UnresolvedIdentity,
    /// The delivery was not recognizably about a payment.
    UnrecognizedPayload,
}

impl std::fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IgnoreReason::NotApproved { status } => write!(f, "status '{status}' not approved"),
            IgnoreReason::UnresolvedIdentity => write!(f, "no usable subscriber email"),
            IgnoreReason::UnrecognizedPayload => write!(f, "unrecognized payload"),
        }
    }
}

/// Terminal state of one processed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Acknowledged without state change.
    Ignored(IgnoreReason),
    /// Both writes succeeded.
    Reconciled,
    /// One (or both) of the two writes failed; logged, still acknowledged.
    PartiallyReconciled {
        plan_failed: bool,
        business_failed: bool,
    },
    /// Plan applied but business linkage deferred until an account exists.
    AwaitingLink,
}

/// What the sender is told, decoupled from the internal taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// 200-class acknowledgment; the sender must not retry.
    Acknowledge,
    /// Distinct non-success status asking the sender to re-deliver.
    RequestRetry,
}

/// Map a pipeline result onto the transport decision.
pub fn disposition_for(result: &PaymentResult<NotificationOutcome>) -> WebhookDisposition {
    match result {
        Err(e) if e.warrants_retry() => WebhookDisposition::RequestRetry,
        _ => WebhookDisposition::Acknowledge,
    }
}

/// The per-notification pipeline. Stateless between deliveries.
pub struct NotificationProcessor {
    normalizer: EventNormalizer,
    reconciler: StateReconciler,
    pool: PgPool,
    webhook_secret: Option<String>,
}

impl NotificationProcessor {
    pub fn new(client: MercadoPagoClient, pool: PgPool, webhook_secret: Option<String>) -> Self {
        Self {
            normalizer: EventNormalizer::new(client),
            reconciler: StateReconciler::new(pool.clone()),
            pool,
            webhook_secret,
        }
    }

    /// Run one delivery to its terminal state.
    ///
    /// Errors: `AuthRejected` and `PaymentNotFetched` only. Every other
    /// failure is converted into an outcome here.
    pub async fn handle_delivery(
        &self,
        delivery: WebhookDelivery,
    ) -> PaymentResult<NotificationOutcome> {
        authenticate(self.webhook_secret.as_deref(), &delivery.credentials)?;

        // Raw log first: diagnostics must survive processing failures.
        self.append_raw_log(&delivery).await;

        let Some(kind) = classify(delivery.body.as_ref(), &delivery.query) else {
            tracing::info!(source = %delivery.source, "Unrecognized notification payload, acknowledging");
            return Ok(NotificationOutcome::Ignored(IgnoreReason::UnrecognizedPayload));
        };

        let outcome = self.normalizer.normalize(kind).await?;

        if !outcome.is_approved() {
            tracing::info!(
                payment_id = %outcome.payment_ref(),
                status = %outcome.status,
                "Non-approved payment acknowledged without state change"
            );
            return Ok(NotificationOutcome::Ignored(IgnoreReason::NotApproved {
                status: outcome.status,
            }));
        }

        let identity = match resolve_identity(&outcome) {
            Ok(identity) => identity,
            Err(PaymentError::UnresolvedIdentity { payment_id }) => {
                tracing::error!(
                    payment_id = %payment_id,
                    "Approved payment with no resolvable subscriber email - manual reconciliation needed"
                );
                return Ok(NotificationOutcome::Ignored(IgnoreReason::UnresolvedIdentity));
            }
            Err(e) => {
                // resolve_identity only reports identity failures; anything
                // else is a bug worth seeing in the logs, not a 5xx.
                tracing::error!(error = %e, "Unexpected resolver error, acknowledging");
                return Ok(NotificationOutcome::Ignored(IgnoreReason::UnresolvedIdentity));
            }
        };

        let report = self.reconciler.apply(&identity, &outcome).await;

        let terminal = if report.fully_applied() {
            if report.awaiting_link() {
                NotificationOutcome::AwaitingLink
            } else {
                NotificationOutcome::Reconciled
            }
        } else {
            let plan_failed = report.plan_write.is_err();
            let business_failed = report.business_write.is_err();
            tracing::error!(
                payment_id = %outcome.payment_ref(),
                email = %identity.email,
                plan_failed,
                business_failed,
                "Partial reconciliation - notification still acknowledged"
            );
            NotificationOutcome::PartiallyReconciled {
                plan_failed,
                business_failed,
            }
        };

        tracing::info!(
            payment_id = %outcome.payment_ref(),
            email = %identity.email,
            plan = %identity.plan,
            outcome = ?terminal,
            "Notification processed"
        );
        Ok(terminal)
    }

    /// Append the raw payload to the notification log. Best-effort: a log
    /// write failure never stops reconciliation.
    async fn append_raw_log(&self, delivery: &WebhookDelivery) {
        let payload = serde_json::json!({
            "body": delivery.body,
            "query": delivery.query,
        });

        let result = sqlx::query(
            r#"
            INSERT INTO payment_notifications (source, payload, received_at)
            VALUES ($1, $2, NOW())
            "#,
        )
        .bind(&delivery.source)
        .bind(&payload)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(source = %delivery.source, error = %e, "Failed to append raw notification log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unfetched_payments_request_retry() {
        assert_eq!(
            disposition_for(&Err(PaymentError::PaymentNotFetched("123".to_string()))),
            WebhookDisposition::RequestRetry
        );
        assert_eq!(
            disposition_for(&Ok(NotificationOutcome::Reconciled)),
            WebhookDisposition::Acknowledge
        );
        assert_eq!(
            disposition_for(&Ok(NotificationOutcome::Ignored(IgnoreReason::NotApproved {
                status: "rejected".to_string()
            }))),
            WebhookDisposition::Acknowledge
        );
        // A partial write failure is an internal problem, never a retry
        // signal: redelivery would not fix the failed write.
        assert_eq!(
            disposition_for(&Ok(NotificationOutcome::PartiallyReconciled {
                plan_failed: true,
                business_failed: false
            })),
            WebhookDisposition::Acknowledge
        );
    }

    #[test]
    fn ignore_reasons_are_distinguishable_in_logs() {
        let unresolved = IgnoreReason::UnresolvedIdentity.to_string();
        let not_approved = IgnoreReason::NotApproved {
            status: "pending".to_string(),
        }
        .to_string();
        assert_ne!(unresolved, not_approved);
        assert!(not_approved.contains("pending"));
    }
}
