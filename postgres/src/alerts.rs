//! Operator alert queue.
//!
//! Payments that were captured but could not be honoured land here for a
//! person to refund or reseat. Alerts are written inside the fulfillment
//! transaction that discovered the problem; this module is the read and
//! triage side.

use async_trait::async_trait;
use boxoffice_core::{
    AlertId, AlertKind, AlertQueue, AlertStatus, OperatorAlert, PaymentEventId, StoreError,
};
use sqlx::{PgPool, Row};

use crate::error::store_error;

/// `PostgreSQL`-backed operator alert queue.
///
/// # Example
///
/// ```no_run
/// use boxoffice_core::AlertQueue;
/// use boxoffice_postgres::PgAlertQueue;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let alerts = PgAlertQueue::new(pool);
///
/// for alert in alerts.list_pending(100).await? {
///     println!("{}: {}", alert.payment_event_id, alert.message);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PgAlertQueue {
    pool: PgPool,
}

impl PgAlertQueue {
    /// Create a queue over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn close(
        &self,
        id: AlertId,
        status: AlertStatus,
        by: &str,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE fulfillment_alerts
            SET status = $1,
                resolved_at = NOW(),
                resolved_by = $2,
                resolution_notes = $3
            WHERE id = $4
            ",
        )
        .bind(status.as_str())
        .bind(by)
        .bind(notes)
        .bind(id.get())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Database(format!("alert {id} does not exist")));
        }

        tracing::info!(alert_id = %id, status = status.as_str(), by, "Alert closed");
        metrics::counter!("fulfillment_alerts_closed_total", "status" => status.as_str())
            .increment(1);
        Ok(())
    }

    fn row_to_alert(row: &sqlx::postgres::PgRow) -> Result<OperatorAlert, StoreError> {
        let kind: String = row.get("kind");
        let status: String = row.get("status");
        let event_id: String = row.get("payment_event_id");

        Ok(OperatorAlert {
            id: AlertId::new(row.get("id")),
            kind: AlertKind::parse(&kind).map_err(|e| StoreError::Database(e.to_string()))?,
            payment_event_id: PaymentEventId::parse(event_id)
                .map_err(|e| StoreError::Database(e.to_string()))?,
            message: row.get("message"),
            details: row.get("details"),
            status: AlertStatus::parse(&status).map_err(|e| StoreError::Database(e.to_string()))?,
            raised_at: row.get("raised_at"),
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

#[async_trait]
impl AlertQueue for PgAlertQueue {
    async fn list_pending(&self, limit: i64) -> Result<Vec<OperatorAlert>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, kind, payment_event_id, message, details, status,
                   raised_at, resolved_at, resolved_by, resolution_notes
            FROM fulfillment_alerts
            WHERE status = 'pending'
            ORDER BY raised_at ASC, id ASC
            LIMIT $1
            ",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter().map(Self::row_to_alert).collect()
    }

    async fn mark_resolved(
        &self,
        id: AlertId,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        self.close(id, AlertStatus::Resolved, resolved_by, notes).await
    }

    async fn mark_discarded(
        &self,
        id: AlertId,
        discarded_by: &str,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        self.close(id, AlertStatus::Discarded, discarded_by, reason)
            .await
    }

    async fn count_pending(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM fulfillment_alerts WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(store_error)?;
        Ok(count)
    }
}
