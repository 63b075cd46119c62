//! Price lookups over `event_instances`, `linkedtickets` and `tickettype`.

use async_trait::async_trait;
use boxoffice_core::{
    Money, PriceCatalog, PriceQuote, QuoteLookup, ShowingId, StoreError, TicketTypeId,
};
use sqlx::{PgPool, Row};

use crate::error::{cents, non_negative, store_error};

/// PostgreSQL price catalog.
#[derive(Clone, Debug)]
pub struct PgPriceCatalog {
    pool: PgPool,
}

impl PgPriceCatalog {
    /// Create a catalog over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceCatalog for PgPriceCatalog {
    async fn quote(
        &self,
        showing_id: ShowingId,
        ticket_type: Option<TicketTypeId>,
    ) -> Result<QuoteLookup, StoreError> {
        // Tier columns are NULL when the showing has no matching linked tier.
        let row = sqlx::query(
            r"
            SELECT ei.id AS showing_id,
                   tt.id AS ticket_type_id,
                   ev.eventname,
                   tt.name AS tier_name,
                   tt.price,
                   ei.salestatus AND ev.active AS sale_enabled,
                   ei.availableseats
            FROM event_instances ei
                JOIN events ev ON ev.id = ei.eventid
                LEFT JOIN linkedtickets lt ON lt.event_instance_id = ei.id
                LEFT JOIN tickettype tt
                    ON tt.id = lt.ticket_type
                   AND ($2::BIGINT IS NULL OR tt.id = $2)
            WHERE ei.id = $1
            ORDER BY tt.id NULLS LAST
            LIMIT 1
            ",
        )
        .bind(showing_id.get())
        .bind(ticket_type.map(TicketTypeId::get))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        let Some(row) = row else {
            return Ok(QuoteLookup::UnknownShowing);
        };
        let Some(ticket_type_id) = row.get::<Option<i64>, _>("ticket_type_id") else {
            return Ok(QuoteLookup::NoTier);
        };

        let event_name: String = row.get("eventname");
        let tier_name: String = row.get("tier_name");
        Ok(QuoteLookup::Priced(PriceQuote {
            showing_id: ShowingId::new(row.get("showing_id")),
            ticket_type_id: TicketTypeId::new(ticket_type_id),
            description: format!("{event_name} - {tier_name}"),
            unit_price: Money::from_cents(cents("price", row.get("price"))?),
            sale_enabled: row.get("sale_enabled"),
            available_seats: non_negative("availableseats", row.get("availableseats"))?,
        }))
    }
}
