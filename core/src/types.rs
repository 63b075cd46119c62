//! Domain types for the box office.
//!
//! Identifiers, money, and the row shapes the fulfillment pipeline reads and
//! writes: customers, showings, tickets, donations, idempotency records and
//! operator alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BoxOfficeError;
use crate::manifest::ShowingQuantity;

// ============================================================================
// Identifiers
// ============================================================================

/// Defines a newtype over a relational row id.
macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            #[doc = concat!("Wraps a raw row id as a `", stringify!($name), "`")]
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw row id
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Identifier of a customer row
    CustomerId
);
row_id!(
    /// Identifier of a showing (event instance)
    ShowingId
);
row_id!(
    /// Identifier of a ticket type / price tier
    TicketTypeId
);
row_id!(
    /// Identifier of an issued ticket
    TicketId
);
row_id!(
    /// Identifier of a donation row
    DonationId
);
row_id!(
    /// Identifier of an operator alert
    AlertId
);

/// Maximum accepted length of a gateway payment reference.
pub const MAX_PAYMENT_EVENT_ID_LEN: usize = 255;

/// The gateway's payment reference, shared by the `succeeded` and `refunded`
/// notifications of one payment. Keys the idempotency record.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentEventId(String);

impl PaymentEventId {
    /// Parses a payment reference.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::Validation`] if the reference is blank or
    /// longer than [`MAX_PAYMENT_EVENT_ID_LEN`] bytes.
    pub fn parse(raw: impl Into<String>) -> Result<Self, BoxOfficeError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BoxOfficeError::Validation(
                "payment event id must not be empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_PAYMENT_EVENT_ID_LEN {
            return Err(BoxOfficeError::Validation(format!(
                "payment event id exceeds {MAX_PAYMENT_EVENT_ID_LEN} bytes"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the reference as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PaymentEventId {
    type Error = BoxOfficeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<PaymentEventId> for String {
    fn from(value: PaymentEventId) -> Self {
        value.0
    }
}

impl fmt::Display for PaymentEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// An amount of money in the smallest currency unit (cents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from whole dollars, `None` on overflow
    #[must_use]
    pub const fn checked_from_dollars(dollars: u64) -> Option<Self> {
        match dollars.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies by a quantity with overflow checking
    #[must_use]
    pub const fn checked_mul(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Customers
// ============================================================================

/// Normalises an email for identity lookup: trimmed and lower-cased.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Contact details submitted with a checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    /// Contact email (identity key)
    pub email: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Phone number
    #[serde(default)]
    pub phone: Option<String>,
    /// Street address
    #[serde(default)]
    pub address: Option<String>,
    /// Newsletter opt-in
    #[serde(default)]
    pub newsletter_opt_in: bool,
    /// Seating accommodation note
    #[serde(default)]
    pub seating_accommodation: Option<String>,
}

impl ContactInfo {
    /// Full display name, first and last joined by a space.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    /// Profile fields written to the customer row on checkout.
    #[must_use]
    pub fn profile(&self) -> CustomerProfile {
        CustomerProfile {
            name: self.full_name(),
            phone: self.phone.clone(),
            address: self.address.clone(),
            newsletter_opt_in: self.newsletter_opt_in,
            seating_accommodation: self.seating_accommodation.clone(),
        }
    }
}

/// The mutable profile fields the identity resolver writes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProfile {
    /// Display name
    pub name: String,
    /// Phone number
    pub phone: Option<String>,
    /// Street address
    pub address: Option<String>,
    /// Newsletter opt-in
    pub newsletter_opt_in: bool,
    /// Seating accommodation note
    pub seating_accommodation: Option<String>,
}

/// A customer row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// Row id
    pub id: CustomerId,
    /// Normalised email, unique
    pub email: String,
    /// Display name
    pub name: String,
    /// Phone number
    pub phone: Option<String>,
    /// Street address
    pub address: Option<String>,
    /// Newsletter opt-in
    pub newsletter_opt_in: bool,
    /// Volunteer list opt-in
    pub volunteer_opt_in: bool,
    /// VIP flag
    pub vip: bool,
    /// Donor badge flag
    pub donor_badge: bool,
    /// Seating accommodation note
    pub seating_accommodation: Option<String>,
}

// ============================================================================
// Inventory
// ============================================================================

/// A scheduled occurrence of an event with finite seating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Showing {
    /// Row id
    pub id: ShowingId,
    /// Total seat capacity
    pub total_seats: u32,
    /// Seats not yet sold; `0 <= available_seats <= total_seats`
    pub available_seats: u32,
    /// Whether tickets may be sold
    pub sale_enabled: bool,
}

// ============================================================================
// Tickets and donations
// ============================================================================

/// A ticket about to be issued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTicket {
    /// Showing admitted to
    pub showing_id: ShowingId,
    /// Purchasing customer
    pub customer_id: CustomerId,
    /// Payment that paid for it
    pub payment_event_id: PaymentEventId,
}

/// An issued admission unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Row id
    pub id: TicketId,
    /// Showing admitted to
    pub showing_id: ShowingId,
    /// Purchasing customer
    pub customer_id: CustomerId,
    /// Always true for tickets issued by fulfillment
    pub paid: bool,
    /// Door check-in flag
    pub checked_in: bool,
    /// Payment that paid for it
    pub payment_event_id: PaymentEventId,
}

/// A donation about to be recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewDonation {
    /// Donating customer
    pub donor_id: CustomerId,
    /// Amount given
    pub amount: Money,
    /// Hide the donor's name in public listings
    pub anonymous: bool,
    /// Payment that carried it
    pub payment_event_id: PaymentEventId,
}

/// A recorded donation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donation {
    /// Row id
    pub id: DonationId,
    /// Donating customer
    pub donor_id: CustomerId,
    /// Donor display name at the time of the gift
    pub donor_name: Option<String>,
    /// Amount given
    pub amount: Money,
    /// Hide the donor's name in public listings
    pub anonymous: bool,
    /// Payment that carried it
    pub payment_event_id: PaymentEventId,
}

// ============================================================================
// Idempotency records
// ============================================================================

/// Outcome recorded against a payment event identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Tickets and donation were issued
    Fulfilled,
    /// A prior fulfillment was reversed
    Refunded,
    /// Capacity ran out after payment; nothing was issued
    FulfillmentFailed,
}

impl PaymentOutcome {
    /// Database string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fulfilled => "fulfilled",
            Self::Refunded => "refunded",
            Self::FulfillmentFailed => "failed",
        }
    }

    /// Parses the database string form.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::Store`] for an unknown outcome string.
    pub fn parse(s: &str) -> Result<Self, BoxOfficeError> {
        match s {
            "fulfilled" => Ok(Self::Fulfilled),
            "refunded" => Ok(Self::Refunded),
            "failed" => Ok(Self::FulfillmentFailed),
            _ => Err(BoxOfficeError::Store(format!("Invalid payment outcome: {s}"))),
        }
    }
}

/// Durable marker for one payment event identifier.
///
/// Lists exactly what its fulfillment produced so a refund can reverse it
/// precisely.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedPaymentEvent {
    /// Gateway payment reference (primary key)
    pub event_id: PaymentEventId,
    /// Current outcome
    pub outcome: PaymentOutcome,
    /// Purchasing customer
    pub customer_id: CustomerId,
    /// Seats taken per showing
    pub showing_quantities: Vec<ShowingQuantity>,
    /// Tickets issued
    pub ticket_ids: Vec<TicketId>,
    /// Donation recorded, if any
    pub donation_id: Option<DonationId>,
    /// Checkout reference the manifest was built under
    pub order_ref: Option<String>,
    /// First processed
    pub processed_at: DateTime<Utc>,
    /// Last outcome change
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Operator alerts
// ============================================================================

/// Why an operator needs to look at a payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Payment captured but a showing had too few seats left
    CapacityExceeded,
    /// Payment captured for a showing that no longer exists
    UnknownShowing,
    /// Refund arrived before any successful payment for the same id
    RefundBeforeFulfillment,
    /// Refund arrived for a payment whose fulfillment had failed
    RefundAfterFailure,
}

impl AlertKind {
    /// Database string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CapacityExceeded => "capacity_exceeded",
            Self::UnknownShowing => "unknown_showing",
            Self::RefundBeforeFulfillment => "refund_before_fulfillment",
            Self::RefundAfterFailure => "refund_after_failure",
        }
    }

    /// Parses the database string form.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::Store`] for an unknown kind.
    pub fn parse(s: &str) -> Result<Self, BoxOfficeError> {
        match s {
            "capacity_exceeded" => Ok(Self::CapacityExceeded),
            "unknown_showing" => Ok(Self::UnknownShowing),
            "refund_before_fulfillment" => Ok(Self::RefundBeforeFulfillment),
            "refund_after_failure" => Ok(Self::RefundAfterFailure),
            _ => Err(BoxOfficeError::Store(format!("Invalid alert kind: {s}"))),
        }
    }
}

/// Review status of an operator alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Waiting for an operator
    Pending,
    /// Handled (refund issued, seats found, ...)
    Resolved,
    /// Closed without action
    Discarded,
}

impl AlertStatus {
    /// Database string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parses the database string form.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::Store`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, BoxOfficeError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(BoxOfficeError::Store(format!("Invalid alert status: {s}"))),
        }
    }
}

/// An alert about to be raised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAlert {
    /// What happened
    pub kind: AlertKind,
    /// Payment it concerns
    pub payment_event_id: PaymentEventId,
    /// Human-readable summary
    pub message: String,
    /// Structured context (manifest, showing, ...)
    pub details: Option<serde_json::Value>,
}

/// An entry in the operator alert queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperatorAlert {
    /// Row id
    pub id: AlertId,
    /// What happened
    pub kind: AlertKind,
    /// Payment it concerns
    pub payment_event_id: PaymentEventId,
    /// Human-readable summary
    pub message: String,
    /// Structured context
    pub details: Option<serde_json::Value>,
    /// Review status
    pub status: AlertStatus,
    /// When raised
    pub raised_at: DateTime<Utc>,
    /// When resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it
    pub resolved_by: Option<String>,
    /// What was done
    pub resolution_notes: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn payment_event_id_is_trimmed() {
        let id = PaymentEventId::parse("  pi_123 ").unwrap();
        assert_eq!(id.as_str(), "pi_123");
    }

    #[test]
    fn blank_payment_event_id_is_rejected() {
        assert!(matches!(
            PaymentEventId::parse("   "),
            Err(BoxOfficeError::Validation(_))
        ));
    }

    #[test]
    fn oversized_payment_event_id_is_rejected() {
        let raw = "x".repeat(MAX_PAYMENT_EVENT_ID_LEN + 1);
        assert!(PaymentEventId::parse(raw).is_err());
    }

    #[test]
    fn payment_event_id_deserialization_validates() {
        let parsed: Result<PaymentEventId, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());
        let parsed: PaymentEventId = serde_json::from_str("\"pi_9\"").unwrap();
        assert_eq!(parsed.as_str(), "pi_9");
    }

    #[test]
    fn money_arithmetic_is_checked() {
        let price = Money::from_cents(1_250);
        assert_eq!(price.checked_mul(3), Some(Money::from_cents(3_750)));
        assert_eq!(Money::from_cents(u64::MAX).checked_add(price), None);
        assert_eq!(Money::checked_from_dollars(25), Some(Money::from_cents(2_500)));
        assert_eq!(price.to_string(), "$12.50");
    }

    #[test]
    fn email_normalisation() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn contact_full_name_joins_parts() {
        let contact = ContactInfo {
            email: "ada@example.com".to_string(),
            first_name: "Ada ".to_string(),
            last_name: " Lovelace".to_string(),
            phone: None,
            address: None,
            newsletter_opt_in: false,
            seating_accommodation: None,
        };
        assert_eq!(contact.full_name(), "Ada Lovelace");
    }

    #[test]
    fn outcome_strings_roundtrip() {
        for outcome in [
            PaymentOutcome::Fulfilled,
            PaymentOutcome::Refunded,
            PaymentOutcome::FulfillmentFailed,
        ] {
            assert_eq!(PaymentOutcome::parse(outcome.as_str()).unwrap(), outcome);
        }
        assert!(PaymentOutcome::parse("pending").is_err());
    }

    #[test]
    fn alert_strings_roundtrip() {
        for kind in [
            AlertKind::CapacityExceeded,
            AlertKind::UnknownShowing,
            AlertKind::RefundBeforeFulfillment,
            AlertKind::RefundAfterFailure,
        ] {
            assert_eq!(AlertKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(AlertStatus::parse("processing").is_err());
    }
}
