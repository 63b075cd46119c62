//! In-memory transactional store
//!
//! [`InMemoryStore`] implements every store seam over a single
//! `tokio::sync::Mutex`-guarded set of tables. A transaction owns the guard
//! and a working copy; commit writes the copy back, drop discards it. This
//! serialises transactions completely, which is stricter than PostgreSQL but
//! enforces the same constraints:
//!
//! - `0 <= available_seats <= total_seats` on every showing
//! - one idempotency record per payment event id (insert conflicts)
//! - tickets and donations reference existing customers
//! - releases clamp at capacity

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use boxoffice_core::{
    AlertId, AlertQueue, AlertStatus, Clock, Customer, CustomerDirectory, CustomerId,
    CustomerProfile, Donation, DonationId, FulfillmentStore, FulfillmentTx, Money, NewAlert,
    NewDonation, NewTicket, OperatorAlert, PaymentEventId, PaymentOutcome, PriceCatalog,
    PriceQuote, ProcessedPaymentEvent, QuoteLookup, ReadinessProbe, ReserveError, Showing,
    ShowingId, StoreError, Ticket, TicketId, TicketTypeId,
};

use crate::mocks::test_clock;

#[derive(Clone, Debug)]
struct TierPrice {
    ticket_type_id: TicketTypeId,
    description: String,
    price: Money,
}

#[derive(Clone, Debug, Default)]
struct Tables {
    customers: BTreeMap<CustomerId, Customer>,
    showings: BTreeMap<ShowingId, Showing>,
    tiers: BTreeMap<ShowingId, Vec<TierPrice>>,
    tickets: BTreeMap<TicketId, Ticket>,
    donations: BTreeMap<DonationId, Donation>,
    payment_events: BTreeMap<PaymentEventId, ProcessedPaymentEvent>,
    alerts: BTreeMap<AlertId, OperatorAlert>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn upsert_customer(&mut self, email: &str, profile: &CustomerProfile) -> CustomerId {
        if let Some(customer) = self.customers.values_mut().find(|c| c.email == email) {
            customer.name.clone_from(&profile.name);
            customer.phone.clone_from(&profile.phone);
            customer.address.clone_from(&profile.address);
            customer.newsletter_opt_in = profile.newsletter_opt_in;
            customer
                .seating_accommodation
                .clone_from(&profile.seating_accommodation);
            return customer.id;
        }

        let id = CustomerId::new(self.next_id());
        self.customers.insert(
            id,
            Customer {
                id,
                email: email.to_string(),
                name: profile.name.clone(),
                phone: profile.phone.clone(),
                address: profile.address.clone(),
                newsletter_opt_in: profile.newsletter_opt_in,
                volunteer_opt_in: false,
                vip: false,
                donor_badge: false,
                seating_accommodation: profile.seating_accommodation.clone(),
            },
        );
        id
    }

    fn require_customer(&self, id: CustomerId) -> Result<&Customer, StoreError> {
        self.customers.get(&id).ok_or_else(|| {
            StoreError::Database(format!("customer {id} does not exist (foreign key)"))
        })
    }
}

/// In-memory store for fast, deterministic tests.
///
/// # Example
///
/// ```
/// use boxoffice_testing::{fixtures, InMemoryStore};
/// use boxoffice_core::ShowingId;
///
/// # async fn example() {
/// let store = InMemoryStore::new();
/// store.add_showing(fixtures::showing(7, 10)).await;
/// assert_eq!(store.available_seats(ShowingId::new(7)).await, Some(10));
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    clock: Arc<dyn Clock>,
    failing_commits: Arc<AtomicUsize>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish_non_exhaustive()
    }
}

impl InMemoryStore {
    /// Create an empty store on the fixed test clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(test_clock()))
    }

    /// Create an empty store stamping rows with `clock`
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            clock,
            failing_commits: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make the next `count` commits fail with [`StoreError::Transient`],
    /// discarding their writes.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Seed a showing
    pub async fn add_showing(&self, showing: Showing) {
        self.tables.lock().await.showings.insert(showing.id, showing);
    }

    /// Link a priced tier to a showing
    pub async fn add_ticket_type(
        &self,
        showing_id: ShowingId,
        ticket_type_id: TicketTypeId,
        description: impl Into<String>,
        price: Money,
    ) {
        self.tables
            .lock()
            .await
            .tiers
            .entry(showing_id)
            .or_default()
            .push(TierPrice {
                ticket_type_id,
                description: description.into(),
                price,
            });
    }

    /// Seed a customer, returning its id
    pub async fn add_customer(&self, email: &str, name: &str) -> CustomerId {
        self.tables.lock().await.upsert_customer(
            email,
            &CustomerProfile {
                name: name.to_string(),
                phone: None,
                address: None,
                newsletter_opt_in: false,
                seating_accommodation: None,
            },
        )
    }

    /// Seats left on a showing
    pub async fn available_seats(&self, id: ShowingId) -> Option<u32> {
        self.tables
            .lock()
            .await
            .showings
            .get(&id)
            .map(|s| s.available_seats)
    }

    /// A showing as currently committed
    pub async fn showing(&self, id: ShowingId) -> Option<Showing> {
        self.tables.lock().await.showings.get(&id).copied()
    }

    /// All issued tickets
    pub async fn tickets(&self) -> Vec<Ticket> {
        self.tables.lock().await.tickets.values().cloned().collect()
    }

    /// Tickets issued for one payment
    pub async fn tickets_for(&self, event_id: &PaymentEventId) -> Vec<Ticket> {
        self.tables
            .lock()
            .await
            .tickets
            .values()
            .filter(|t| &t.payment_event_id == event_id)
            .cloned()
            .collect()
    }

    /// All recorded donations
    pub async fn donations(&self) -> Vec<Donation> {
        self.tables.lock().await.donations.values().cloned().collect()
    }

    /// All customers
    pub async fn customers(&self) -> Vec<Customer> {
        self.tables.lock().await.customers.values().cloned().collect()
    }

    /// Idempotency record for a payment
    pub async fn payment_event(&self, event_id: &PaymentEventId) -> Option<ProcessedPaymentEvent> {
        self.tables
            .lock()
            .await
            .payment_events
            .get(event_id)
            .cloned()
    }

    /// All operator alerts, any status
    pub async fn alerts(&self) -> Vec<OperatorAlert> {
        self.tables.lock().await.alerts.values().cloned().collect()
    }

    async fn update_alert(
        &self,
        id: AlertId,
        status: AlertStatus,
        by: &str,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut tables = self.tables.lock().await;
        let alert = tables
            .alerts
            .get_mut(&id)
            .ok_or_else(|| StoreError::Database(format!("alert {id} does not exist")))?;
        alert.status = status;
        alert.resolved_at = Some(now);
        alert.resolved_by = Some(by.to_string());
        alert.resolution_notes = notes.map(str::to_string);
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryStore {
    async fn resolve(
        &self,
        email: &str,
        profile: &CustomerProfile,
    ) -> Result<CustomerId, StoreError> {
        Ok(self.tables.lock().await.upsert_customer(email, profile))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Customer>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .customers
            .values()
            .find(|c| c.email == email)
            .cloned())
    }
}

#[async_trait]
impl PriceCatalog for InMemoryStore {
    async fn quote(
        &self,
        showing_id: ShowingId,
        ticket_type: Option<TicketTypeId>,
    ) -> Result<QuoteLookup, StoreError> {
        let tables = self.tables.lock().await;
        let Some(showing) = tables.showings.get(&showing_id) else {
            return Ok(QuoteLookup::UnknownShowing);
        };
        let tiers = tables.tiers.get(&showing_id).map_or(&[][..], Vec::as_slice);
        let tier = match ticket_type {
            Some(id) => tiers.iter().find(|t| t.ticket_type_id == id),
            None => tiers.iter().min_by_key(|t| t.ticket_type_id),
        };

        Ok(tier.map_or(QuoteLookup::NoTier, |tier| {
            QuoteLookup::Priced(PriceQuote {
                showing_id,
                ticket_type_id: tier.ticket_type_id,
                description: tier.description.clone(),
                unit_price: tier.price,
                sale_enabled: showing.sale_enabled,
                available_seats: showing.available_seats,
            })
        }))
    }
}

#[async_trait]
impl FulfillmentStore for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTx {
            guard,
            working,
            now: self.clock.now(),
            failing_commits: Arc::clone(&self.failing_commits),
        })
    }
}

/// Transaction over [`InMemoryStore`].
pub struct InMemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    now: DateTime<Utc>,
    failing_commits: Arc<AtomicUsize>,
}

#[async_trait]
impl FulfillmentTx for InMemoryTx {
    async fn lock_payment_event(
        &mut self,
        event_id: &PaymentEventId,
    ) -> Result<Option<ProcessedPaymentEvent>, StoreError> {
        Ok(self.working.payment_events.get(event_id).cloned())
    }

    async fn reserve(&mut self, showing_id: ShowingId, quantity: u32) -> Result<u32, ReserveError> {
        let showing = self
            .working
            .showings
            .get_mut(&showing_id)
            .ok_or(ReserveError::UnknownShowing(showing_id))?;
        if showing.available_seats < quantity {
            return Err(ReserveError::InsufficientCapacity {
                showing_id,
                requested: quantity,
                available: showing.available_seats,
            });
        }
        showing.available_seats -= quantity;
        Ok(showing.available_seats)
    }

    async fn release(&mut self, showing_id: ShowingId, quantity: u32) -> Result<u32, StoreError> {
        let showing = self
            .working
            .showings
            .get_mut(&showing_id)
            .ok_or_else(|| StoreError::Database(format!("showing {showing_id} does not exist")))?;
        showing.available_seats = showing
            .available_seats
            .saturating_add(quantity)
            .min(showing.total_seats);
        Ok(showing.available_seats)
    }

    async fn insert_tickets(&mut self, tickets: &[NewTicket]) -> Result<Vec<TicketId>, StoreError> {
        let mut ids = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            self.working.require_customer(ticket.customer_id)?;
            if !self.working.showings.contains_key(&ticket.showing_id) {
                return Err(StoreError::Database(format!(
                    "showing {} does not exist (foreign key)",
                    ticket.showing_id
                )));
            }
            let id = TicketId::new(self.working.next_id());
            self.working.tickets.insert(
                id,
                Ticket {
                    id,
                    showing_id: ticket.showing_id,
                    customer_id: ticket.customer_id,
                    paid: true,
                    checked_in: false,
                    payment_event_id: ticket.payment_event_id.clone(),
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn insert_donation(&mut self, donation: &NewDonation) -> Result<DonationId, StoreError> {
        let donor_name = self.working.require_customer(donation.donor_id)?.name.clone();
        let id = DonationId::new(self.working.next_id());
        self.working.donations.insert(
            id,
            Donation {
                id,
                donor_id: donation.donor_id,
                donor_name: Some(donor_name),
                amount: donation.amount,
                anonymous: donation.anonymous,
                payment_event_id: donation.payment_event_id.clone(),
            },
        );
        Ok(id)
    }

    async fn delete_tickets(&mut self, ids: &[TicketId]) -> Result<u64, StoreError> {
        let removed = ids
            .iter()
            .filter(|&id| self.working.tickets.remove(id).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn delete_donation(&mut self, id: DonationId) -> Result<u64, StoreError> {
        Ok(u64::from(self.working.donations.remove(&id).is_some()))
    }

    async fn insert_payment_event(
        &mut self,
        record: &ProcessedPaymentEvent,
    ) -> Result<(), StoreError> {
        if self.working.payment_events.contains_key(&record.event_id) {
            return Err(StoreError::Conflict(format!(
                "payment event {} already recorded",
                record.event_id
            )));
        }
        self.working
            .payment_events
            .insert(record.event_id.clone(), record.clone());
        Ok(())
    }

    async fn update_payment_event_outcome(
        &mut self,
        event_id: &PaymentEventId,
        outcome: PaymentOutcome,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let record = self.working.payment_events.get_mut(event_id).ok_or_else(|| {
            StoreError::Database(format!("payment event {event_id} is not recorded"))
        })?;
        record.outcome = outcome;
        record.updated_at = at;
        Ok(())
    }

    async fn raise_alert(&mut self, alert: &NewAlert) -> Result<AlertId, StoreError> {
        if let Some(existing) = self
            .working
            .alerts
            .values()
            .find(|a| a.payment_event_id == alert.payment_event_id && a.kind == alert.kind)
        {
            return Ok(existing.id);
        }

        let id = AlertId::new(self.working.next_id());
        self.working.alerts.insert(
            id,
            OperatorAlert {
                id,
                kind: alert.kind,
                payment_event_id: alert.payment_event_id.clone(),
                message: alert.message.clone(),
                details: alert.details.clone(),
                status: AlertStatus::Pending,
                raised_at: self.now,
                resolved_at: None,
                resolved_by: None,
                resolution_notes: None,
            },
        );
        Ok(id)
    }

    async fn commit(self) -> Result<(), StoreError> {
        let Self {
            mut guard,
            working,
            failing_commits,
            ..
        } = self;

        let injected = failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Transient(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }

        *guard = working;
        Ok(())
    }
}

#[async_trait]
impl AlertQueue for InMemoryStore {
    async fn list_pending(&self, limit: i64) -> Result<Vec<OperatorAlert>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let tables = self.tables.lock().await;
        let mut pending: Vec<OperatorAlert> = tables
            .alerts
            .values()
            .filter(|a| a.status == AlertStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|a| (a.raised_at, a.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_resolved(
        &self,
        id: AlertId,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        self.update_alert(id, AlertStatus::Resolved, resolved_by, notes)
            .await
    }

    async fn mark_discarded(
        &self,
        id: AlertId,
        discarded_by: &str,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        self.update_alert(id, AlertStatus::Discarded, discarded_by, reason)
            .await
    }

    async fn count_pending(&self) -> Result<i64, StoreError> {
        let count = self
            .tables
            .lock()
            .await
            .alerts
            .values()
            .filter(|a| a.status == AlertStatus::Pending)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl ReadinessProbe for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
