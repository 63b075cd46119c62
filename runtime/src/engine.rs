//! Fulfillment Engine.
//!
//! Consumes payment notifications and applies the transition chosen by
//! [`decide`] inside one store transaction per attempt. The idempotency
//! record is read and written in the same transaction as the inventory and
//! ticket mutations, so a notification delivered N times has the effect of
//! delivering it once.
//!
//! ```text
//! succeeded: lock record ─▶ reserve each showing ─▶ insert tickets (batch)
//!                             │                     ─▶ insert donation
//!                             │                     ─▶ insert record(fulfilled) ─▶ commit
//!                             └─ short ─▶ rollback ─▶ new tx: record(failed) + alert
//!
//! refunded:  lock record ─▶ delete recorded tickets/donation
//!                       ─▶ release recorded quantities ─▶ record(refunded) ─▶ commit
//! ```

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use boxoffice_core::{
    decide, AlertKind, BoxOfficeError, Clock, Decision, FulfillmentReport, FulfillmentStore,
    FulfillmentTx, IgnoreReason, ManifestCodec, NewAlert, NewDonation, NewTicket,
    NotificationKind, OrderManifest, PaymentEventId, PaymentNotification, PaymentOutcome,
    ProcessedPaymentEvent, ReserveError, ShowingId, StoreError,
};

use crate::metrics::FulfillmentMetrics;
use crate::retry::RetryPolicy;

/// Anything that can take a verified payment notification.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Applies the notification.
    ///
    /// # Errors
    ///
    /// See [`FulfillmentEngine::handle`].
    async fn handle(
        &self,
        notification: &PaymentNotification,
    ) -> Result<FulfillmentReport, BoxOfficeError>;
}

/// A showing that could not be reserved after payment.
#[derive(Debug, Clone)]
struct Shortfall {
    kind: AlertKind,
    showing_id: ShowingId,
    requested: u32,
    available: Option<u32>,
}

enum Step {
    Done(FulfillmentReport),
    Shortfall(Shortfall),
}

/// Idempotent consumer of payment notifications.
pub struct FulfillmentEngine<S> {
    store: S,
    codec: ManifestCodec,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl<S: FulfillmentStore> FulfillmentEngine<S> {
    /// Creates an engine over `store` with the default retry policy.
    #[must_use]
    pub fn new(store: S, codec: ManifestCodec, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            codec,
            clock,
            retry: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy used for transient store failures.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Applies one payment notification.
    ///
    /// Capacity exhaustion after payment is not an error: it is recorded as
    /// [`PaymentOutcome::FulfillmentFailed`] with an operator alert and
    /// reported as [`FulfillmentReport::Failed`].
    ///
    /// # Errors
    ///
    /// - [`BoxOfficeError::Validation`] if a `succeeded` notification carries
    ///   no manifest or one that fails verification
    /// - [`BoxOfficeError::TransientStore`] if store contention outlasts the
    ///   retry policy; the notification can be redelivered
    /// - [`BoxOfficeError::Store`] for other store faults
    #[tracing::instrument(
        skip_all,
        fields(event_id = %notification.event_id, kind = notification.kind.as_str())
    )]
    pub async fn handle(
        &self,
        notification: &PaymentNotification,
    ) -> Result<FulfillmentReport, BoxOfficeError> {
        let started = Instant::now();
        let result = match notification.kind {
            NotificationKind::Succeeded => self.handle_succeeded(notification).await,
            NotificationKind::Refunded => self.handle_refunded(&notification.event_id).await,
        };

        FulfillmentMetrics::record_notification(
            notification.kind.as_str(),
            result_label(&result),
            started.elapsed(),
        );
        if let Err(err) = &result {
            tracing::warn!(error = %err, "Payment notification not applied");
        }
        result
    }

    async fn handle_succeeded(
        &self,
        notification: &PaymentNotification,
    ) -> Result<FulfillmentReport, BoxOfficeError> {
        let metadata = notification.metadata.as_ref().ok_or_else(|| {
            BoxOfficeError::Validation("succeeded notification carries no manifest".to_string())
        })?;
        let manifest = self.codec.decode(metadata)?;
        let event_id = &notification.event_id;

        let step = self
            .retry
            .run(|| self.attempt_succeeded(event_id, &manifest))
            .await?;

        match step {
            Step::Done(report) => Ok(report),
            Step::Shortfall(shortfall) => Ok(self
                .retry
                .run(|| self.record_failure(event_id, &manifest, &shortfall))
                .await?),
        }
    }

    async fn handle_refunded(
        &self,
        event_id: &PaymentEventId,
    ) -> Result<FulfillmentReport, BoxOfficeError> {
        Ok(self.retry.run(|| self.attempt_refunded(event_id)).await?)
    }

    async fn attempt_succeeded(
        &self,
        event_id: &PaymentEventId,
        manifest: &OrderManifest,
    ) -> Result<Step, StoreError> {
        let mut tx = self.store.begin().await?;
        let current = tx.lock_payment_event(event_id).await?;

        match decide(
            current.map(|record| record.outcome),
            NotificationKind::Succeeded,
        ) {
            Decision::Fulfill => self.fulfill(tx, event_id, manifest).await,
            Decision::Ignore(reason) => Ok(Step::Done(self.ignore(tx, event_id, reason).await?)),
            Decision::Reverse => Err(StoreError::Database(
                "succeeded notification resolved to a reversal".to_string(),
            )),
        }
    }

    async fn attempt_refunded(
        &self,
        event_id: &PaymentEventId,
    ) -> Result<FulfillmentReport, StoreError> {
        let mut tx = self.store.begin().await?;
        let current = tx.lock_payment_event(event_id).await?;

        match (
            decide(
                current.as_ref().map(|record| record.outcome),
                NotificationKind::Refunded,
            ),
            current,
        ) {
            (Decision::Reverse, Some(record)) => self.reverse(tx, record).await,
            (Decision::Ignore(reason), _) => self.ignore(tx, event_id, reason).await,
            (decision, _) => Err(StoreError::Database(format!(
                "refunded notification resolved to {decision:?}"
            ))),
        }
    }

    async fn fulfill(
        &self,
        mut tx: S::Tx,
        event_id: &PaymentEventId,
        manifest: &OrderManifest,
    ) -> Result<Step, StoreError> {
        for line in &manifest.showing_quantities {
            match tx.reserve(line.showing_id, line.quantity).await {
                Ok(remaining) => {
                    tracing::debug!(
                        showing_id = %line.showing_id,
                        quantity = line.quantity,
                        remaining,
                        "Seats reserved"
                    );
                }
                // Returning drops `tx`, rolling back earlier reservations.
                Err(ReserveError::InsufficientCapacity {
                    showing_id,
                    requested,
                    available,
                }) => {
                    return Ok(Step::Shortfall(Shortfall {
                        kind: AlertKind::CapacityExceeded,
                        showing_id,
                        requested,
                        available: Some(available),
                    }));
                }
                Err(ReserveError::UnknownShowing(showing_id)) => {
                    return Ok(Step::Shortfall(Shortfall {
                        kind: AlertKind::UnknownShowing,
                        showing_id,
                        requested: line.quantity,
                        available: None,
                    }));
                }
                Err(ReserveError::Store(err)) => return Err(err),
            }
        }

        let tickets: Vec<NewTicket> = manifest
            .showing_quantities
            .iter()
            .flat_map(|line| {
                std::iter::repeat_n(
                    NewTicket {
                        showing_id: line.showing_id,
                        customer_id: manifest.customer_id,
                        payment_event_id: event_id.clone(),
                    },
                    line.quantity as usize,
                )
            })
            .collect();
        let ticket_ids = tx.insert_tickets(&tickets).await?;

        let donation_id = if manifest.donation.is_zero() {
            None
        } else {
            Some(
                tx.insert_donation(&NewDonation {
                    donor_id: manifest.customer_id,
                    amount: manifest.donation,
                    anonymous: manifest.anonymous_donation,
                    payment_event_id: event_id.clone(),
                })
                .await?,
            )
        };

        let now = self.clock.now();
        tx.insert_payment_event(&ProcessedPaymentEvent {
            event_id: event_id.clone(),
            outcome: PaymentOutcome::Fulfilled,
            customer_id: manifest.customer_id,
            showing_quantities: manifest.showing_quantities.clone(),
            ticket_ids: ticket_ids.clone(),
            donation_id,
            order_ref: Some(manifest.order_ref.clone()),
            processed_at: now,
            updated_at: now,
        })
        .await?;
        tx.commit().await?;

        FulfillmentMetrics::record_issued(ticket_ids.len());
        tracing::info!(
            customer_id = %manifest.customer_id,
            tickets = ticket_ids.len(),
            donation = %manifest.donation,
            "Order fulfilled"
        );
        Ok(Step::Done(FulfillmentReport::Fulfilled {
            ticket_ids,
            donation_id,
        }))
    }

    async fn reverse(
        &self,
        mut tx: S::Tx,
        record: ProcessedPaymentEvent,
    ) -> Result<FulfillmentReport, StoreError> {
        let tickets_removed = tx.delete_tickets(&record.ticket_ids).await?;
        let donation_removed = match record.donation_id {
            Some(id) => tx.delete_donation(id).await? > 0,
            None => false,
        };
        for line in &record.showing_quantities {
            let remaining = tx.release(line.showing_id, line.quantity).await?;
            tracing::debug!(
                showing_id = %line.showing_id,
                quantity = line.quantity,
                remaining,
                "Seats released"
            );
        }
        tx.update_payment_event_outcome(&record.event_id, PaymentOutcome::Refunded, self.clock.now())
            .await?;
        tx.commit().await?;

        if tickets_removed != record.ticket_ids.len() as u64 {
            tracing::warn!(
                expected = record.ticket_ids.len(),
                removed = tickets_removed,
                "Some recorded tickets were already gone"
            );
        }
        FulfillmentMetrics::record_reversed(tickets_removed);
        tracing::info!(
            customer_id = %record.customer_id,
            tickets_removed,
            donation_removed,
            "Order reversed"
        );
        Ok(FulfillmentReport::Refunded {
            tickets_removed: usize::try_from(tickets_removed).unwrap_or(usize::MAX),
            donation_removed,
        })
    }

    async fn ignore(
        &self,
        mut tx: S::Tx,
        event_id: &PaymentEventId,
        reason: IgnoreReason,
    ) -> Result<FulfillmentReport, StoreError> {
        let alert = match reason {
            IgnoreReason::RefundBeforeFulfillment => {
                tracing::warn!("Refund arrived before any successful payment; waiting for it");
                Some(NewAlert {
                    kind: AlertKind::RefundBeforeFulfillment,
                    payment_event_id: event_id.clone(),
                    message: format!("Refund for {event_id} arrived before its payment"),
                    details: None,
                })
            }
            IgnoreReason::RefundAfterFailure => {
                tracing::warn!("Refund for a payment whose fulfillment failed");
                Some(NewAlert {
                    kind: AlertKind::RefundAfterFailure,
                    payment_event_id: event_id.clone(),
                    message: format!("Refund for {event_id} after failed fulfillment"),
                    details: None,
                })
            }
            IgnoreReason::AlreadyFulfilled
            | IgnoreReason::AlreadyRefunded
            | IgnoreReason::AlreadyFailed => {
                tracing::debug!(reason = reason.as_str(), "Duplicate notification ignored");
                None
            }
        };

        if let Some(alert) = alert {
            tx.raise_alert(&alert).await?;
            tx.commit().await?;
            FulfillmentMetrics::record_alert(alert.kind.as_str());
        }
        Ok(FulfillmentReport::Ignored { reason })
    }

    /// Records a paid order that could not be seated, in its own transaction.
    async fn record_failure(
        &self,
        event_id: &PaymentEventId,
        manifest: &OrderManifest,
        shortfall: &Shortfall,
    ) -> Result<FulfillmentReport, StoreError> {
        let mut tx = self.store.begin().await?;
        let current = tx.lock_payment_event(event_id).await?;
        // A concurrent delivery may have recorded an outcome meanwhile.
        if let Decision::Ignore(reason) = decide(
            current.map(|record| record.outcome),
            NotificationKind::Succeeded,
        ) {
            return Ok(FulfillmentReport::Ignored { reason });
        }

        let now = self.clock.now();
        tx.insert_payment_event(&ProcessedPaymentEvent {
            event_id: event_id.clone(),
            outcome: PaymentOutcome::FulfillmentFailed,
            customer_id: manifest.customer_id,
            showing_quantities: Vec::new(),
            ticket_ids: Vec::new(),
            donation_id: None,
            order_ref: Some(manifest.order_ref.clone()),
            processed_at: now,
            updated_at: now,
        })
        .await?;

        let message = match shortfall.available {
            Some(available) => format!(
                "Payment {event_id} captured but showing {} has {available} seats for {} tickets",
                shortfall.showing_id, shortfall.requested
            ),
            None => format!(
                "Payment {event_id} captured for unknown showing {}",
                shortfall.showing_id
            ),
        };
        tx.raise_alert(&NewAlert {
            kind: shortfall.kind,
            payment_event_id: event_id.clone(),
            message,
            details: Some(json!({
                "showing_id": shortfall.showing_id,
                "requested": shortfall.requested,
                "available": shortfall.available,
                "manifest": manifest,
            })),
        })
        .await?;
        tx.commit().await?;

        FulfillmentMetrics::record_alert(shortfall.kind.as_str());
        tracing::error!(
            showing_id = %shortfall.showing_id,
            requested = shortfall.requested,
            available = ?shortfall.available,
            customer_id = %manifest.customer_id,
            "Fulfillment failed after payment; operator alert raised"
        );
        Ok(FulfillmentReport::Failed {
            showing_id: shortfall.showing_id,
        })
    }
}

#[async_trait]
impl<S: FulfillmentStore> NotificationHandler for FulfillmentEngine<S> {
    async fn handle(
        &self,
        notification: &PaymentNotification,
    ) -> Result<FulfillmentReport, BoxOfficeError> {
        Self::handle(self, notification).await
    }
}

const fn result_label(result: &Result<FulfillmentReport, BoxOfficeError>) -> &'static str {
    match result {
        Ok(FulfillmentReport::Fulfilled { .. }) => "fulfilled",
        Ok(FulfillmentReport::Refunded { .. }) => "refunded",
        Ok(FulfillmentReport::Failed { .. }) => "failed",
        Ok(FulfillmentReport::Ignored { .. }) => "ignored",
        Err(BoxOfficeError::Validation(_)) => "invalid",
        Err(BoxOfficeError::TransientStore(_)) => "transient",
        Err(_) => "error",
    }
}
