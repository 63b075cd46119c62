//! Inventory Ledger: seat counters on `event_instances`.
//!
//! Every change is one conditional `UPDATE`, never a read followed by a
//! write, so two transactions can never both take the last seats. The
//! free functions run on any connection (a fulfillment transaction passes
//! its own); [`PgInventoryLedger`] wraps each call in its own transaction.

use boxoffice_core::{BoxOfficeError, ReserveError, ShowingId, StoreError};
use sqlx::{PgConnection, PgPool};

use crate::error::{non_negative, store_error};

fn seats_param(quantity: u32) -> Result<i32, StoreError> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::Database(format!("seat quantity out of range: {quantity}")))
}

/// Takes `quantity` seats from a showing, returning the seats left.
///
/// # Errors
///
/// - [`ReserveError::InsufficientCapacity`] if fewer than `quantity` remain
/// - [`ReserveError::UnknownShowing`] if the showing does not exist
/// - [`ReserveError::Store`] if the statement fails
pub async fn reserve(
    conn: &mut PgConnection,
    showing_id: ShowingId,
    quantity: u32,
) -> Result<u32, ReserveError> {
    let seats = seats_param(quantity)?;
    let updated: Option<(i32,)> = sqlx::query_as(
        r"
        UPDATE event_instances
        SET availableseats = availableseats - $2
        WHERE id = $1 AND availableseats >= $2
        RETURNING availableseats
        ",
    )
    .bind(showing_id.get())
    .bind(seats)
    .fetch_optional(&mut *conn)
    .await
    .map_err(store_error)?;

    if let Some((left,)) = updated {
        return Ok(non_negative("availableseats", left)?);
    }

    // Nothing matched: either the showing is missing or it is short.
    let current: Option<(i32,)> =
        sqlx::query_as("SELECT availableseats FROM event_instances WHERE id = $1")
            .bind(showing_id.get())
            .fetch_optional(&mut *conn)
            .await
            .map_err(store_error)?;

    match current {
        None => Err(ReserveError::UnknownShowing(showing_id)),
        Some((available,)) => Err(ReserveError::InsufficientCapacity {
            showing_id,
            requested: quantity,
            available: non_negative("availableseats", available)?,
        }),
    }
}

/// Returns `quantity` seats to a showing, clamped at its capacity.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if the showing does not exist or the
/// statement fails.
pub async fn release(
    conn: &mut PgConnection,
    showing_id: ShowingId,
    quantity: u32,
) -> Result<u32, StoreError> {
    let seats = seats_param(quantity)?;
    let updated: Option<(i32,)> = sqlx::query_as(
        r"
        UPDATE event_instances
        SET availableseats = LEAST(totalseats, availableseats + $2)
        WHERE id = $1
        RETURNING availableseats
        ",
    )
    .bind(showing_id.get())
    .bind(seats)
    .fetch_optional(&mut *conn)
    .await
    .map_err(store_error)?;

    let (left,) = updated.ok_or_else(|| {
        StoreError::Database(format!("cannot release seats on missing showing {showing_id}"))
    })?;
    non_negative("availableseats", left)
}

/// Seat counters outside a fulfillment transaction.
#[derive(Clone, Debug)]
pub struct PgInventoryLedger {
    pool: PgPool,
}

impl PgInventoryLedger {
    /// Create a ledger over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Takes seats in a transaction of its own.
    ///
    /// # Errors
    ///
    /// - [`BoxOfficeError::CapacityExceeded`] if too few seats remain
    /// - [`BoxOfficeError::Validation`] if the showing does not exist
    /// - [`BoxOfficeError::TransientStore`] / [`BoxOfficeError::Store`] on
    ///   database failure
    pub async fn reserve(&self, showing_id: ShowingId, quantity: u32) -> Result<u32, BoxOfficeError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let left = reserve(&mut tx, showing_id, quantity).await?;
        tx.commit().await.map_err(store_error)?;
        Ok(left)
    }

    /// Returns seats in a transaction of its own.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::Store`] if the showing does not exist, or a
    /// store error on database failure.
    pub async fn release(&self, showing_id: ShowingId, quantity: u32) -> Result<u32, BoxOfficeError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let left = release(&mut tx, showing_id, quantity).await?;
        tx.commit().await.map_err(store_error)?;
        Ok(left)
    }

    /// Seats currently available, `None` for an unknown showing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn available_seats(&self, showing_id: ShowingId) -> Result<Option<u32>, StoreError> {
        let row: Option<(i32,)> =
            sqlx::query_as("SELECT availableseats FROM event_instances WHERE id = $1")
                .bind(showing_id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;
        row.map(|(seats,)| non_negative("availableseats", seats))
            .transpose()
    }
}
