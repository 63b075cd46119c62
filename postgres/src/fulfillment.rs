//! Fulfillment unit of work over one PostgreSQL transaction.

use async_trait::async_trait;
use boxoffice_core::{
    AlertId, CustomerId, DonationId, FulfillmentStore, FulfillmentTx, NewAlert, NewDonation, NewTicket,
    PaymentEventId, PaymentOutcome, ProcessedPaymentEvent, ReserveError, ShowingId,
    ShowingQuantity, StoreError, TicketId,
};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::error::store_error;
use crate::inventory;

/// Opens fulfillment transactions on a pool.
#[derive(Clone, Debug)]
pub struct PgFulfillmentStore {
    pool: PgPool,
}

impl PgFulfillmentStore {
    /// Create a store over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl FulfillmentStore for PgFulfillmentStore {
    type Tx = PgFulfillmentTx;

    async fn begin(&self) -> Result<PgFulfillmentTx, StoreError> {
        let tx = self.pool.begin().await.map_err(store_error)?;
        Ok(PgFulfillmentTx { tx })
    }
}

/// One open fulfillment transaction.
///
/// Dropping it without [`commit`](FulfillmentTx::commit) rolls back.
pub struct PgFulfillmentTx {
    tx: Transaction<'static, Postgres>,
}

fn to_i64(value: u64, what: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Database(format!("{what} out of range: {value}")))
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<ProcessedPaymentEvent, StoreError> {
    let event_id: String = row.get("event_id");
    let outcome: String = row.get("outcome");
    let Json(showing_quantities): Json<Vec<ShowingQuantity>> = row
        .try_get("showing_quantities")
        .map_err(|e| StoreError::Database(format!("unreadable showing_quantities: {e}")))?;
    let ticket_ids: Vec<i64> = row.get("ticket_ids");
    let donation_id: Option<i64> = row.get("donation_id");

    Ok(ProcessedPaymentEvent {
        event_id: PaymentEventId::parse(event_id)
            .map_err(|e| StoreError::Database(e.to_string()))?,
        outcome: PaymentOutcome::parse(&outcome).map_err(|e| StoreError::Database(e.to_string()))?,
        customer_id: CustomerId::new(row.get("customer_id")),
        showing_quantities,
        ticket_ids: ticket_ids.into_iter().map(TicketId::new).collect(),
        donation_id: donation_id.map(DonationId::new),
        order_ref: row.get("order_ref"),
        processed_at: row.get("processed_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl FulfillmentTx for PgFulfillmentTx {
    async fn lock_payment_event(
        &mut self,
        event_id: &PaymentEventId,
    ) -> Result<Option<ProcessedPaymentEvent>, StoreError> {
        // Row locks cannot cover a row that does not exist yet, so first
        // serialize on the payment reference itself.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(event_id.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(store_error)?;

        let row = sqlx::query(
            r"
            SELECT event_id, outcome, customer_id, showing_quantities, ticket_ids,
                   donation_id, order_ref, processed_at, updated_at
            FROM processed_payment_events
            WHERE event_id = $1
            FOR UPDATE
            ",
        )
        .bind(event_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(store_error)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn reserve(&mut self, showing_id: ShowingId, quantity: u32) -> Result<u32, ReserveError> {
        inventory::reserve(&mut self.tx, showing_id, quantity).await
    }

    async fn release(&mut self, showing_id: ShowingId, quantity: u32) -> Result<u32, StoreError> {
        inventory::release(&mut self.tx, showing_id, quantity).await
    }

    async fn insert_tickets(&mut self, tickets: &[NewTicket]) -> Result<Vec<TicketId>, StoreError> {
        if tickets.is_empty() {
            return Ok(Vec::new());
        }

        let showings: Vec<i64> = tickets.iter().map(|t| t.showing_id.get()).collect();
        let customers: Vec<i64> = tickets.iter().map(|t| t.customer_id.get()).collect();
        let payments: Vec<String> = tickets
            .iter()
            .map(|t| t.payment_event_id.as_str().to_string())
            .collect();

        let ids: Vec<(i64,)> = sqlx::query_as(
            r"
            INSERT INTO tickets (eventinstanceid, custid, paid, checkedin, payment_intent)
            SELECT showing, customer, TRUE, FALSE, payment
            FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::TEXT[])
                WITH ORDINALITY AS t(showing, customer, payment, position)
            ORDER BY position
            RETURNING ticketno
            ",
        )
        .bind(&showings)
        .bind(&customers)
        .bind(&payments)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(store_error)?;

        Ok(ids.into_iter().map(|(id,)| TicketId::new(id)).collect())
    }

    async fn insert_donation(&mut self, donation: &NewDonation) -> Result<DonationId, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            r"
            INSERT INTO donations (donorid, isanonymous, amount, dononame, payment_intent)
            SELECT c.id, $2, $3, c.custname, $4
            FROM customers c
            WHERE c.id = $1
            RETURNING id
            ",
        )
        .bind(donation.donor_id.get())
        .bind(donation.anonymous)
        .bind(to_i64(donation.amount.cents(), "donation amount")?)
        .bind(donation.payment_event_id.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(store_error)?;

        let (id,) = row.ok_or_else(|| {
            StoreError::Database(format!("donor {} does not exist", donation.donor_id))
        })?;
        Ok(DonationId::new(id))
    }

    async fn delete_tickets(&mut self, ids: &[TicketId]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let result = sqlx::query("DELETE FROM tickets WHERE ticketno = ANY($1)")
            .bind(&ids)
            .execute(&mut *self.tx)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_donation(&mut self, id: DonationId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM donations WHERE id = $1")
            .bind(id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected())
    }

    async fn insert_payment_event(
        &mut self,
        record: &ProcessedPaymentEvent,
    ) -> Result<(), StoreError> {
        let ticket_ids: Vec<i64> = record.ticket_ids.iter().map(|id| id.get()).collect();
        sqlx::query(
            r"
            INSERT INTO processed_payment_events (
                event_id, outcome, customer_id, showing_quantities, ticket_ids,
                donation_id, order_ref, processed_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(record.event_id.as_str())
        .bind(record.outcome.as_str())
        .bind(record.customer_id.get())
        .bind(Json(&record.showing_quantities))
        .bind(&ticket_ids)
        .bind(record.donation_id.map(DonationId::get))
        .bind(&record.order_ref)
        .bind(record.processed_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn update_payment_event_outcome(
        &mut self,
        event_id: &PaymentEventId,
        outcome: PaymentOutcome,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE processed_payment_events
            SET outcome = $2, updated_at = $3
            WHERE event_id = $1
            ",
        )
        .bind(event_id.as_str())
        .bind(outcome.as_str())
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Database(format!(
                "no payment record for {event_id}"
            )));
        }
        Ok(())
    }

    async fn raise_alert(&mut self, alert: &NewAlert) -> Result<AlertId, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO fulfillment_alerts (kind, payment_event_id, message, details)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (payment_event_id, kind) DO UPDATE
            SET message = EXCLUDED.message
            RETURNING id
            ",
        )
        .bind(alert.kind.as_str())
        .bind(alert.payment_event_id.as_str())
        .bind(&alert.message)
        .bind(&alert.details)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(store_error)?;

        tracing::debug!(alert_id = id, kind = alert.kind.as_str(), "Alert stored");
        Ok(AlertId::new(id))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(store_error)
    }
}
