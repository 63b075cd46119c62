//! `PostgreSQL` store for the box office.
//!
//! Implements every storage seam of `boxoffice-core` with sqlx:
//!
//! - [`PgCustomerDirectory`]: one row per normalised email, upserted atomically
//! - [`PgPriceCatalog`]: authoritative prices for checkout
//! - [`PgFulfillmentStore`]: one transaction per fulfillment attempt, seats
//!   reserved with conditional updates, tickets inserted in one batch
//! - [`PgAlertQueue`]: operator triage of captured payments that could not be
//!   honoured
//!
//! # Example
//!
//! ```ignore
//! use boxoffice_postgres::{migrate, PgFulfillmentStore, PostgresConfig};
//!
//! let pool = PostgresConfig::new("postgres://localhost/boxoffice").connect().await?;
//! migrate(&pool).await?;
//! let store = PgFulfillmentStore::new(pool);
//! ```

/// Operator alert queue
pub mod alerts;
/// Price catalog
pub mod catalog;
/// Customer Identity Resolver
pub mod customers;
/// Error mapping
pub mod error;
/// Fulfillment unit of work
pub mod fulfillment;
/// Inventory Ledger
pub mod inventory;
/// Pool, migrations and readiness
pub mod pool;

pub use alerts::PgAlertQueue;
pub use catalog::PgPriceCatalog;
pub use customers::PgCustomerDirectory;
pub use error::PostgresError;
pub use fulfillment::{PgFulfillmentStore, PgFulfillmentTx};
pub use inventory::PgInventoryLedger;
pub use pool::{migrate, PgReadinessProbe, PostgresConfig};
