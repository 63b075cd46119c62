//! # Box Office Testing
//!
//! Testing utilities for the box office.
//!
//! This crate provides:
//! - [`FixedClock`] and [`test_clock`] for deterministic timestamps
//! - [`InMemoryStore`], implementing every store seam with PostgreSQL's
//!   constraints
//! - [`MockPaymentGateway`], which records requests and can fail or hang
//! - [`fixtures`] for showings, contacts, manifests and notifications
//!
//! ## Example
//!
//! ```ignore
//! use boxoffice_testing::{fixtures, InMemoryStore};
//! use boxoffice_runtime::FulfillmentEngine;
//!
//! #[tokio::test]
//! async fn test_fulfillment() {
//!     let store = InMemoryStore::new();
//!     store.add_showing(fixtures::showing(7, 10)).await;
//!     let customer = store.add_customer("ada@example.com", "Ada").await;
//!
//!     let engine = FulfillmentEngine::new(store.clone(), fixtures::codec(), Arc::new(test_clock()));
//!     let manifest = fixtures::manifest(customer, &[(7, 3)], Money::ZERO);
//!     engine.handle(&fixtures::succeeded("pi_1", &manifest)).await.unwrap();
//!
//!     assert_eq!(store.available_seats(ShowingId::new(7)).await, Some(7));
//! }
//! ```

use boxoffice_core::environment::Clock;
use chrono::{DateTime, Utc};

pub mod fixtures;
pub mod gateway;
pub mod memory;

/// Deterministic stand-ins for ambient services.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Clock frozen at one instant, so processed-at and alert timestamps are
    /// predictable.
    ///
    /// ```
    /// use boxoffice_testing::mocks::FixedClock;
    /// use boxoffice_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FixedClock(DateTime<Utc>);

    impl FixedClock {
        /// Freeze at `instant`
        #[must_use]
        pub const fn new(instant: DateTime<Utc>) -> Self {
            Self(instant)
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    /// Midnight UTC on 2025-01-01, the instant every fixture is stamped with
    #[must_use]
    #[allow(clippy::expect_used, clippy::missing_panics_doc)]
    pub fn test_clock() -> FixedClock {
        let instant = DateTime::from_timestamp(1_735_689_600, 0).expect("valid unix timestamp");
        FixedClock::new(instant)
    }
}

pub use gateway::MockPaymentGateway;
pub use memory::{InMemoryStore, InMemoryTx};
pub use mocks::{test_clock, FixedClock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_frozen_at_new_year() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }
}
