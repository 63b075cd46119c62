//! HTTP surface for the box office.
//!
//! Two write endpoints sit in front of the runtime:
//!
//! - `POST /api/checkout` prices a cart and opens a hosted payment session
//! - `POST /webhook` applies payment-outcome notifications idempotently
//!
//! plus `/health` and `/ready`. Domain errors become JSON bodies through
//! [`AppError`]; every request carries a [`CorrelationId`].
//!
//! ```ignore
//! let state = AppState::new(checkout, Arc::new(engine), Arc::new(probe));
//! let app = build_router(state);
//! axum::serve(listener, app).await?;
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::AppError;
pub use middleware::{correlation_id_layer, CorrelationId, CORRELATION_ID_HEADER};
pub use routes::build_router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
