//! Fulfillment state machine.
//!
//! Per payment event identifier the idempotency record moves through:
//!
//! ```text
//!                 succeeded                      refunded
//!   Unseen ─────────────────────▶ Fulfilled ───────────────▶ Refunded
//!     │                               ▲  │                      │
//!     │ succeeded, seats short        │  └─ succeeded: ignore   └─ any: ignore
//!     ▼                               │
//!   FulfillmentFailed ── any: ignore (refund raises an alert)
//!
//!   Unseen + refunded: ignore, alert, wait for the succeeded notification
//! ```
//!
//! [`decide`] is pure; the engine applies its decision inside the same store
//! transaction that read the current outcome.

use serde::{Deserialize, Serialize};

use crate::manifest::SessionMetadata;
use crate::types::{DonationId, PaymentEventId, PaymentOutcome, ShowingId, TicketId};

/// Kind of payment-outcome notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Payment captured
    Succeeded,
    /// Payment refunded
    Refunded,
}

impl NotificationKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Refunded => "refunded",
        }
    }
}

/// A verified notification from the payment gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    /// Payment reference shared by the payment's notifications
    pub event_id: PaymentEventId,
    /// What happened
    pub kind: NotificationKind,
    /// Echoed session metadata; required for `succeeded`
    #[serde(default)]
    pub metadata: Option<SessionMetadata>,
}

/// Why a notification changed nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Repeated `succeeded` after fulfillment
    AlreadyFulfilled,
    /// Repeated `refunded` after reversal, or a late `succeeded`
    AlreadyRefunded,
    /// Repeated `succeeded` after a capacity failure
    AlreadyFailed,
    /// `refunded` with no record yet
    RefundBeforeFulfillment,
    /// `refunded` for a payment whose fulfillment failed
    RefundAfterFailure,
}

impl IgnoreReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyFulfilled => "already_fulfilled",
            Self::AlreadyRefunded => "already_refunded",
            Self::AlreadyFailed => "already_failed",
            Self::RefundBeforeFulfillment => "refund_before_fulfillment",
            Self::RefundAfterFailure => "refund_after_failure",
        }
    }
}

/// What the engine must do for a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Reserve seats, issue tickets and donation, record `fulfilled`
    Fulfill,
    /// Delete recorded rows, release seats, record `refunded`
    Reverse,
    /// Change nothing
    Ignore(IgnoreReason),
}

/// Decides the transition for `kind` given the recorded outcome.
#[must_use]
pub const fn decide(current: Option<PaymentOutcome>, kind: NotificationKind) -> Decision {
    match (current, kind) {
        (None, NotificationKind::Succeeded) => Decision::Fulfill,
        (None, NotificationKind::Refunded) => {
            Decision::Ignore(IgnoreReason::RefundBeforeFulfillment)
        }
        (Some(PaymentOutcome::Fulfilled), NotificationKind::Succeeded) => {
            Decision::Ignore(IgnoreReason::AlreadyFulfilled)
        }
        (Some(PaymentOutcome::Fulfilled), NotificationKind::Refunded) => Decision::Reverse,
        (Some(PaymentOutcome::Refunded), _) => Decision::Ignore(IgnoreReason::AlreadyRefunded),
        (Some(PaymentOutcome::FulfillmentFailed), NotificationKind::Succeeded) => {
            Decision::Ignore(IgnoreReason::AlreadyFailed)
        }
        (Some(PaymentOutcome::FulfillmentFailed), NotificationKind::Refunded) => {
            Decision::Ignore(IgnoreReason::RefundAfterFailure)
        }
    }
}

/// Result of handling one notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FulfillmentReport {
    /// Tickets (and donation) issued
    Fulfilled {
        /// Issued tickets
        ticket_ids: Vec<TicketId>,
        /// Recorded donation
        donation_id: Option<DonationId>,
    },
    /// A prior fulfillment was reversed
    Refunded {
        /// Tickets deleted
        tickets_removed: usize,
        /// Whether a donation was deleted
        donation_removed: bool,
    },
    /// Not enough seats after payment; recorded for an operator
    Failed {
        /// Showing that ran out
        showing_id: ShowingId,
    },
    /// Nothing changed
    Ignored {
        /// Why
        reason: IgnoreReason,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_success_fulfills() {
        assert_eq!(decide(None, NotificationKind::Succeeded), Decision::Fulfill);
    }

    #[test]
    fn duplicate_success_is_ignored() {
        assert_eq!(
            decide(Some(PaymentOutcome::Fulfilled), NotificationKind::Succeeded),
            Decision::Ignore(IgnoreReason::AlreadyFulfilled)
        );
    }

    #[test]
    fn refund_after_fulfillment_reverses() {
        assert_eq!(
            decide(Some(PaymentOutcome::Fulfilled), NotificationKind::Refunded),
            Decision::Reverse
        );
    }

    #[test]
    fn refunded_is_terminal() {
        for kind in [NotificationKind::Succeeded, NotificationKind::Refunded] {
            assert_eq!(
                decide(Some(PaymentOutcome::Refunded), kind),
                Decision::Ignore(IgnoreReason::AlreadyRefunded)
            );
        }
    }

    #[test]
    fn early_refund_waits_for_success() {
        assert_eq!(
            decide(None, NotificationKind::Refunded),
            Decision::Ignore(IgnoreReason::RefundBeforeFulfillment)
        );
    }

    #[test]
    fn failed_fulfillment_never_retries() {
        assert_eq!(
            decide(Some(PaymentOutcome::FulfillmentFailed), NotificationKind::Succeeded),
            Decision::Ignore(IgnoreReason::AlreadyFailed)
        );
        assert_eq!(
            decide(Some(PaymentOutcome::FulfillmentFailed), NotificationKind::Refunded),
            Decision::Ignore(IgnoreReason::RefundAfterFailure)
        );
    }
}
