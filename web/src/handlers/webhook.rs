//! `POST /webhook`: payment-outcome notifications from the gateway.
//!
//! Deliveries are at least once and unordered. Anything the engine has
//! decided (fulfilled, refunded, failed for capacity, ignored as a
//! duplicate) is acknowledged with 200 so the gateway stops redelivering.
//! Only transient store failures answer 503, asking for another delivery.

use axum::{
    extract::{rejection::JsonRejection, State},
    Extension, Json,
};
use boxoffice_core::{FulfillmentReport, PaymentNotification};
use serde::Serialize;

use crate::{middleware::CorrelationId, state::AppState, WebResult};

/// Acknowledgement body.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Always `true`
    pub received: bool,
    /// What the notification did
    #[serde(flatten)]
    pub report: FulfillmentReport,
}

/// Applies one payment notification.
///
/// # Errors
///
/// - 400/422 for a malformed body or an unverifiable manifest
/// - 503 when store contention outlasted the retry budget
/// - 500 on other store faults
pub async fn receive(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    body: Result<Json<PaymentNotification>, JsonRejection>,
) -> WebResult<Json<WebhookResponse>> {
    let Json(notification) = body?;
    tracing::info!(
        %correlation_id,
        event_id = %notification.event_id,
        kind = notification.kind.as_str(),
        "Payment notification received"
    );

    let report = state.notifications.handle(&notification).await?;

    Ok(Json(WebhookResponse {
        received: true,
        report,
    }))
}
