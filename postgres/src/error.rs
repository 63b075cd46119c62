//! Mapping from sqlx failures onto the store error taxonomy.

use boxoffice_core::StoreError;
use thiserror::Error;

/// SQLSTATE for a unique-constraint violation.
const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE for a serialization failure.
const SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE for a detected deadlock.
const DEADLOCK_DETECTED: &str = "40P01";
/// SQLSTATE for `lock_timeout` expiry.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Errors raised while setting the store up.
#[derive(Error, Debug)]
pub enum PostgresError {
    /// The pool could not reach the database.
    #[error("Failed to connect: {0}")]
    Connect(#[source] sqlx::Error),

    /// A migration failed to apply.
    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Classifies a sqlx error.
///
/// Contention and connectivity problems become [`StoreError::Transient`],
/// unique violations become [`StoreError::Conflict`] and everything else is
/// [`StoreError::Database`].
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(UNIQUE_VIOLATION) => StoreError::Conflict(db.message().to_string()),
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE) => {
                StoreError::Transient(db.message().to_string())
            }
            _ => StoreError::Database(err.to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Transient(err.to_string())
        }
        _ => StoreError::Database(err.to_string()),
    }
}

/// Converts a column that must hold a non-negative count.
pub(crate) fn non_negative(column: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Database(format!("{column} is negative: {value}")))
}

/// Converts a non-negative cents column.
pub(crate) fn cents(column: &str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::Database(format!("{column} is negative: {value}")))
}
