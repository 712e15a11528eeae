//! Payment notification endpoint
//!
//! The provider delivers at-least-once with no fixed body shape and retries
//! on any non-2xx, so the response policy is deliberate: acknowledge
//! everything that was processed to a terminal state (including ignored and
//! partially-applied outcomes), answer 401 only for a failed shared-secret
//! check, and answer 503 only when the canonical payment could not be read
//! and a re-delivery can succeed later.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use vitrina_payments::{
    disposition_for, PaymentError, WebhookCredentials, WebhookDelivery, WebhookDisposition,
};

use crate::state::AppState;

const SOURCE: &str = "mercadopago";

/// GET self-test used by the provider's endpoint validation.
pub async fn self_test() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true, "service": "payment-notifications" }))
}

/// POST notification receiver.
pub async fn receive_notification(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let credentials = extract_credentials(&query, &headers);

    // Body shape varies by era; an unparseable body is treated as absent and
    // classification falls back to the querystring.
    let body_json = if body.trim().is_empty() {
        None
    } else {
        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "Notification body is not JSON, relying on query");
                None
            }
        }
    };

    let delivery = WebhookDelivery {
        source: SOURCE.to_string(),
        body: body_json,
        query,
        credentials,
    };

    let result = state.payments.processor.handle_delivery(delivery).await;

    if matches!(result, Err(PaymentError::AuthRejected)) {
        tracing::warn!("Webhook delivery rejected: shared secret mismatch");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "received": false, "error": "unauthorized" })),
        );
    }

    match disposition_for(&result) {
        WebhookDisposition::Acknowledge => {
            let outcome = match &result {
                Ok(outcome) => format!("{outcome:?}"),
                Err(e) => {
                    // Should not happen: the processor converts everything
                    // else into an outcome. Acknowledge anyway.
                    tracing::error!(error = %e, "Unclassified processing error acknowledged");
                    "error".to_string()
                }
            };
            (
                StatusCode::OK,
                Json(serde_json::json!({ "received": true, "outcome": outcome })),
            )
        }
        WebhookDisposition::RequestRetry => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "received": false, "retry": true })),
        ),
    }
}

fn extract_credentials(
    query: &HashMap<String, String>,
    headers: &HeaderMap,
) -> WebhookCredentials {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    WebhookCredentials {
        query_token: query.get("token").cloned(),
        header_token: header_str("x-webhook-token"),
        bearer_token: header_str("authorization")
            .and_then(|v| v.strip_prefix("Bearer ").map(str::to_string)),
    }
}
