//! Error taxonomy for the fulfillment pipeline.

use thiserror::Error;

use crate::types::ShowingId;

/// Errors surfaced by the checkout and fulfillment operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoxOfficeError {
    /// Malformed cart, contact, manifest or notification. Client-correctable,
    /// nothing was changed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A showing sold out between checkout and fulfillment.
    #[error("Showing {showing_id} cannot seat {requested} more")]
    CapacityExceeded {
        /// Showing that ran out
        showing_id: ShowingId,
        /// Units the order asked for
        requested: u32,
    },

    /// Contention or timeout in the store. Safe to retry.
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// The payment gateway could not create a session. Safe to retry.
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The payment gateway refused the session request. Retrying the same
    /// request will not help.
    #[error("Payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    /// Non-retryable store fault.
    #[error("Store error: {0}")]
    Store(String),
}

impl BoxOfficeError {
    /// Whether the caller may retry the same request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore(_) | Self::GatewayUnavailable(_))
    }
}

/// Errors returned by store implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Serialization failure, deadlock, pool timeout or lost connection.
    #[error("Transient store failure: {0}")]
    Transient(String),

    /// A uniqueness constraint rejected the write (a concurrent writer won).
    #[error("Conflicting write: {0}")]
    Conflict(String),

    /// Any other database fault.
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether re-running the whole transaction may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Conflict(_))
    }
}

impl From<StoreError> for BoxOfficeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transient(msg) | StoreError::Conflict(msg) => Self::TransientStore(msg),
            StoreError::Database(msg) => Self::Store(msg),
        }
    }
}

/// Failure of an inventory reservation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReserveError {
    /// Fewer seats remain than requested.
    #[error("Showing {showing_id} has {available} seats left, {requested} requested")]
    InsufficientCapacity {
        /// Showing reserved against
        showing_id: ShowingId,
        /// Units requested
        requested: u32,
        /// Units left when the reservation was refused
        available: u32,
    },

    /// No such showing.
    #[error("Showing {0} does not exist")]
    UnknownShowing(ShowingId),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ReserveError> for BoxOfficeError {
    fn from(err: ReserveError) -> Self {
        match err {
            ReserveError::InsufficientCapacity {
                showing_id,
                requested,
                ..
            } => Self::CapacityExceeded {
                showing_id,
                requested,
            },
            ReserveError::UnknownShowing(id) => {
                Self::Validation(format!("showing {id} does not exist"))
            }
            ReserveError::Store(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(BoxOfficeError::TransientStore("x".into()).is_retryable());
        assert!(BoxOfficeError::GatewayUnavailable("x".into()).is_retryable());
        assert!(!BoxOfficeError::Validation("x".into()).is_retryable());
        assert!(!BoxOfficeError::GatewayRejected("x".into()).is_retryable());
        assert!(
            !BoxOfficeError::CapacityExceeded {
                showing_id: ShowingId::new(1),
                requested: 2
            }
            .is_retryable()
        );
    }

    #[test]
    fn conflicts_surface_as_transient() {
        let err: BoxOfficeError = StoreError::Conflict("duplicate key".into()).into();
        assert_eq!(err, BoxOfficeError::TransientStore("duplicate key".into()));
        let err: BoxOfficeError = StoreError::Database("boom".into()).into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn reservation_failures_map_to_capacity_and_validation() {
        let short: BoxOfficeError = ReserveError::InsufficientCapacity {
            showing_id: ShowingId::new(3),
            requested: 4,
            available: 1,
        }
        .into();
        assert_eq!(
            short,
            BoxOfficeError::CapacityExceeded {
                showing_id: ShowingId::new(3),
                requested: 4
            }
        );

        let missing: BoxOfficeError = ReserveError::UnknownShowing(ShowingId::new(9)).into();
        assert!(matches!(missing, BoxOfficeError::Validation(_)));
    }
}
