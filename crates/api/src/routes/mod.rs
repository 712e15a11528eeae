//! Route assembly

pub mod checkout;
pub mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/webhooks/mercadopago",
            post(webhooks::receive_notification).get(webhooks::self_test),
        )
        .route("/api/checkout/preference", post(checkout::create_preference))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
