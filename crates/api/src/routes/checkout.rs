//! Preference-creation endpoint
//!
//! Consumed by the registration UI: the buyer picks a plan, we register a
//! preference with the provider and send back the redirect URL.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use vitrina_payments::CheckoutRequest;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub ok: bool,
    pub id: String,
    pub init_point: String,
}

pub async fn create_preference(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let redirect = state.payments.checkout.create_checkout(request).await?;

    Ok(Json(CheckoutResponse {
        ok: true,
        id: redirect.preference_id,
        init_point: redirect.redirect_url,
    }))
}
