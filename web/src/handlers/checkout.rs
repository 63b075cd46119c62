//! `POST /api/checkout`

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use boxoffice_runtime::CheckoutRequest;
use serde::Serialize;

use crate::{state::AppState, WebResult};

/// Created session, as returned to the browser.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// Gateway session id
    pub session_id: String,
    /// Hosted payment page to redirect to
    pub url: Option<String>,
    /// Order reference carried in the manifest
    pub order_ref: String,
    /// Amount the payer will be charged
    pub total_cents: u64,
}

/// Prices the cart and opens a hosted payment session.
///
/// # Errors
///
/// - 400/422 for a malformed body, bad contact details or an unsellable cart
/// - 503 if the payment gateway fails or times out (retryable)
/// - 500 on store faults
pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> WebResult<(StatusCode, Json<CheckoutResponse>)> {
    let Json(request) = body?;
    let receipt = state.checkout.create_session(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            session_id: receipt.session.session_id,
            url: receipt.session.url,
            order_ref: receipt.order_ref,
            total_cents: receipt.total.cents(),
        }),
    ))
}
