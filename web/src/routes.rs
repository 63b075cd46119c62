//! Router assembly.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{handlers, middleware::correlation_id_layer, state::AppState};

/// Builds the application router.
///
/// ```text
/// GET  /health        liveness
/// GET  /ready         database readiness
/// POST /api/checkout  open a payment session
/// POST /webhook       payment-outcome notifications
/// ```
pub fn build_router(state: AppState) -> Router {
    let api = Router::new().route("/checkout", post(handlers::checkout::create));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/webhook", post(handlers::webhook::receive))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
