//! Inbound notification classification and authentication
//!
//! The provider has shipped several webhook shapes over the years and will
//! happily send any of them: a JSON body with `{type, action, data: {id}}`,
//! a legacy `{topic, id}` querystring, or a body whose `resource` field is a
//! URL ending in the id. Instead of probing optional fields ad hoc, every
//! delivery is classified up front into a closed set of variants that the
//! normalizer can match exhaustively.

use std::collections::HashMap;

use subtle::ConstantTimeEq;

use crate::error::{PaymentError, PaymentResult};

/// The canonical shape of a notification after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    /// The body already carries a resolved status and subscriber email in
    /// its metadata. Internal test/simulation path; no upstream call needed.
    InlineMetadata {
        status: String,
        email: String,
        plan: Option<String>,
        external_reference: Option<String>,
    },
    /// The notification points at a merchant order.
    OrderReference { order_id: String },
    /// The notification carries (or implies) a payment id.
    PaymentReference { payment_id: String },
}

/// Credentials presented by the sender, already pulled out of the transport.
///
/// The shared secret may arrive as the `token` query parameter, the
/// `x-webhook-token` header, or a bearer Authorization header.
#[derive(Debug, Clone, Default)]
pub struct WebhookCredentials {
    pub query_token: Option<String>,
    pub header_token: Option<String>,
    pub bearer_token: Option<String>,
}

impl WebhookCredentials {
    fn presented(&self) -> Option<&str> {
        self.query_token
            .as_deref()
            .or(self.header_token.as_deref())
            .or(self.bearer_token.as_deref())
    }
}

/// Check the shared secret, if one is configured.
///
/// Comparison is constant-time. A configured secret with no or a wrong
/// presented token is `AuthRejected`; with no secret configured every
/// delivery is accepted.
pub fn authenticate(secret: Option<&str>, credentials: &WebhookCredentials) -> PaymentResult<()> {
    let Some(secret) = secret else {
        return Ok(());
    };

    let Some(presented) = credentials.presented() else {
        return Err(PaymentError::AuthRejected);
    };

    if presented.as_bytes().ct_eq(secret.as_bytes()).into() {
        Ok(())
    } else {
        Err(PaymentError::AuthRejected)
    }
}

/// Classify a delivery from its JSON body (if any) and query parameters.
///
/// Precedence: inline metadata, then the modern JSON shape, then the legacy
/// querystring, then the `resource` URL form. `None` means the delivery is
/// not recognizably about a payment and should be acknowledged and dropped.
pub fn classify(
    body: Option<&serde_json::Value>,
    query: &HashMap<String, String>,
) -> Option<NotificationKind> {
    if let Some(body) = body {
        if let Some(inline) = classify_inline(body) {
            return Some(inline);
        }

        // Modern shape: {"type": "payment", "action": "payment.updated", "data": {"id": ...}}
        let kind = body
            .get("type")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                body.get("action")
                    .and_then(|v| v.as_str())
                    .map(|a| a.split('.').next().unwrap_or(a).to_string())
            });
        if let Some(kind) = kind {
            if let Some(id) = body.get("data").and_then(|d| d.get("id")).and_then(id_string) {
                return Some(reference_for(&kind, id));
            }
        }

        // Legacy body: {"topic": "merchant_order", "resource": "https://.../merchant_orders/123"}
        if let Some(resource) = body.get("resource").and_then(|v| v.as_str()) {
            if let Some(id) = trailing_numeric_id(resource) {
                let topic = body
                    .get("topic")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        if resource.contains("merchant_order") {
                            "merchant_order".to_string()
                        } else {
                            "payment".to_string()
                        }
                    });
                return Some(reference_for(&topic, id));
            }
        }
    }

    // Legacy querystring: ?topic=payment&id=123
    if let (Some(topic), Some(id)) = (query.get("topic"), query.get("id")) {
        if !id.is_empty() {
            return Some(reference_for(topic, id.clone()));
        }
    }

    None
}

fn classify_inline(body: &serde_json::Value) -> Option<NotificationKind> {
    let metadata = body.get("metadata")?;
    let status = metadata.get("status")?.as_str()?.to_string();
    let email = metadata.get("email")?.as_str()?.to_string();

    Some(NotificationKind::InlineMetadata {
        status,
        email,
        plan: metadata
            .get("plan")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        external_reference: body
            .get("external_reference")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

fn reference_for(topic: &str, id: String) -> NotificationKind {
    if topic.starts_with("merchant_order") {
        NotificationKind::OrderReference { order_id: id }
    } else {
        NotificationKind::PaymentReference { payment_id: id }
    }
}

/// Provider ids arrive as either JSON numbers or strings.
fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn trailing_numeric_id(resource: &str) -> Option<String> {
    let last = resource.trim_end_matches('/').rsplit('/').next()?;
    if !last.is_empty() && last.bytes().all(|b| b.is_ascii_digit()) {
        Some(last.to_string())
    } else {
        None
    }
}
