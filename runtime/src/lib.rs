//! # Box Office Runtime
//!
//! The imperative shell around `boxoffice-core`.
//!
//! ## Core Components
//!
//! - **Checkout Session Builder**: resolves the customer, prices the cart from
//!   the catalog, signs the order manifest and opens a gateway session
//! - **Fulfillment Engine**: applies payment notifications idempotently, one
//!   store transaction per attempt, retrying transient contention
//! - **HTTP gateway client**: hosted-checkout sessions over HTTPS
//!
//! ## Example
//!
//! ```ignore
//! use boxoffice_runtime::FulfillmentEngine;
//!
//! let engine = FulfillmentEngine::new(store, codec, Arc::new(SystemClock));
//! let report = engine.handle(&notification).await?;
//! ```

/// Checkout Session Builder
pub mod checkout;

/// Fulfillment Engine
pub mod engine;

/// HTTP payment gateway client
pub mod gateway;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

pub use checkout::{
    CartLine, CheckoutReceipt, CheckoutRequest, CheckoutSessionBuilder, CheckoutSettings,
};
pub use engine::{FulfillmentEngine, NotificationHandler};
pub use gateway::HttpPaymentGateway;
pub use retry::RetryPolicy;
