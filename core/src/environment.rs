//! Injected dependencies.
//!
//! Everything the checkout builder and fulfillment engine touch outside their
//! own memory sits behind one of these traits: the clock, the customer table,
//! the price catalog, the transactional store and the operator alert queue.
//! PostgreSQL implementations live in `boxoffice-postgres`, in-memory ones in
//! `boxoffice-testing`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReserveError, StoreError};
use crate::types::{
    AlertId, Customer, CustomerId, CustomerProfile, DonationId, Money, NewAlert, NewDonation,
    NewTicket, OperatorAlert, PaymentEventId, PaymentOutcome, ProcessedPaymentEvent, ShowingId,
    TicketId, TicketTypeId,
};

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Customer Identity Resolver.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Returns the id of the customer with this email, creating the row if
    /// needed and overwriting its profile fields otherwise.
    ///
    /// `email` must already be normalised. Concurrent calls for the same email
    /// yield the same id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    async fn resolve(&self, email: &str, profile: &CustomerProfile)
        -> Result<CustomerId, StoreError>;

    /// Looks up a customer by normalised email.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError>;
}

/// Authoritative price for one showing and tier, read at checkout time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Showing priced
    pub showing_id: ShowingId,
    /// Tier the price belongs to
    pub ticket_type_id: TicketTypeId,
    /// Line item name, e.g. "Hamlet - General Admission"
    pub description: String,
    /// Unit price
    pub unit_price: Money,
    /// Whether the showing is on sale
    pub sale_enabled: bool,
    /// Seats left at read time (advisory)
    pub available_seats: u32,
}

/// Result of a [`PriceCatalog`] lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuoteLookup {
    /// The showing and tier are priced
    Priced(PriceQuote),
    /// The showing exists but has no linked tier matching the request
    NoTier,
    /// No such showing
    UnknownShowing,
}

impl QuoteLookup {
    /// The quote, if the lookup found one.
    #[must_use]
    pub fn priced(self) -> Option<PriceQuote> {
        match self {
            Self::Priced(quote) => Some(quote),
            Self::NoTier | Self::UnknownShowing => None,
        }
    }
}

/// Read-only price lookup.
#[async_trait]
pub trait PriceCatalog: Send + Sync {
    /// Prices one unit of `showing_id`.
    ///
    /// With no `ticket_type` the showing's lowest-numbered linked tier is used.
    /// A showing with no linked tier at all, or without the requested one, is
    /// [`QuoteLookup::NoTier`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    async fn quote(
        &self,
        showing_id: ShowingId,
        ticket_type: Option<TicketTypeId>,
    ) -> Result<QuoteLookup, StoreError>;
}

/// Opens fulfillment units of work.
#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    /// Transaction type
    type Tx: FulfillmentTx;

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transient`] if no connection is available.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// One atomic fulfillment attempt.
///
/// Either every write made through the transaction becomes visible on
/// [`commit`](FulfillmentTx::commit), or none does. Dropping the transaction
/// without committing rolls it back.
#[async_trait]
pub trait FulfillmentTx: Send + Sized {
    /// Reads the idempotency record for `event_id` and holds it (or its
    /// absence) against concurrent writers until the transaction ends.
    async fn lock_payment_event(
        &mut self,
        event_id: &PaymentEventId,
    ) -> Result<Option<ProcessedPaymentEvent>, StoreError>;

    /// Takes `quantity` seats from a showing, returning the seats left.
    ///
    /// Fails without side effects if fewer than `quantity` remain.
    async fn reserve(&mut self, showing_id: ShowingId, quantity: u32) -> Result<u32, ReserveError>;

    /// Returns `quantity` seats to a showing, clamped at its capacity.
    /// Returns the seats left after the release.
    async fn release(&mut self, showing_id: ShowingId, quantity: u32) -> Result<u32, StoreError>;

    /// Issues tickets as one batch, returning their ids in input order.
    async fn insert_tickets(&mut self, tickets: &[NewTicket]) -> Result<Vec<TicketId>, StoreError>;

    /// Records a donation, snapshotting the donor's display name.
    async fn insert_donation(&mut self, donation: &NewDonation) -> Result<DonationId, StoreError>;

    /// Deletes tickets by id, returning how many existed.
    async fn delete_tickets(&mut self, ids: &[TicketId]) -> Result<u64, StoreError>;

    /// Deletes a donation by id, returning how many existed.
    async fn delete_donation(&mut self, id: DonationId) -> Result<u64, StoreError>;

    /// Inserts a new idempotency record.
    ///
    /// Fails with [`StoreError::Conflict`] if a record for the same event id
    /// already exists.
    async fn insert_payment_event(&mut self, record: &ProcessedPaymentEvent)
        -> Result<(), StoreError>;

    /// Moves an existing idempotency record to `outcome`.
    async fn update_payment_event_outcome(
        &mut self,
        event_id: &PaymentEventId,
        outcome: PaymentOutcome,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Queues an operator alert as part of this transaction.
    async fn raise_alert(&mut self, alert: &NewAlert) -> Result<AlertId, StoreError>;

    /// Makes every write visible.
    async fn commit(self) -> Result<(), StoreError>;
}

/// Operator view of raised alerts.
#[async_trait]
pub trait AlertQueue: Send + Sync {
    /// Oldest pending alerts first.
    async fn list_pending(&self, limit: i64) -> Result<Vec<OperatorAlert>, StoreError>;

    /// Marks an alert handled.
    async fn mark_resolved(
        &self,
        id: AlertId,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Closes an alert without action.
    async fn mark_discarded(
        &self,
        id: AlertId,
        discarded_by: &str,
        reason: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Number of pending alerts.
    async fn count_pending(&self) -> Result<i64, StoreError>;
}

/// Dependency probed by the readiness endpoint.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Succeeds if the dependency answers.
    async fn ping(&self) -> Result<(), StoreError>;
}
