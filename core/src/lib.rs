//! # Box Office Core
//!
//! Domain types and pure logic for the payment-to-inventory fulfillment
//! pipeline.
//!
//! ## Core Concepts
//!
//! - **Order manifest**: what a paid order entitles the customer to, signed
//!   into the payment session and trusted only when the signature verifies
//! - **Idempotency record**: one [`ProcessedPaymentEvent`] per gateway payment
//!   reference, recording the outcome and exactly what fulfillment produced
//! - **State machine**: [`decide`] maps the recorded outcome and an incoming
//!   notification to fulfill, reverse or ignore
//! - **Environment**: stores, catalog, gateway and clock are injected traits
//!
//! ## Example
//!
//! ```
//! use boxoffice_core::{decide, Decision, NotificationKind, PaymentOutcome};
//!
//! assert_eq!(decide(None, NotificationKind::Succeeded), Decision::Fulfill);
//! assert_eq!(
//!     decide(Some(PaymentOutcome::Fulfilled), NotificationKind::Refunded),
//!     Decision::Reverse
//! );
//! ```

pub mod environment;
pub mod error;
pub mod fulfillment;
pub mod gateway;
pub mod manifest;
pub mod types;

pub use environment::{
    AlertQueue, Clock, CustomerDirectory, FulfillmentStore, FulfillmentTx, PriceCatalog,
    PriceQuote, QuoteLookup, ReadinessProbe, SystemClock,
};
pub use error::{BoxOfficeError, ReserveError, StoreError};
pub use fulfillment::{
    decide, Decision, FulfillmentReport, IgnoreReason, NotificationKind, PaymentNotification,
};
pub use gateway::{
    CheckoutSession, CheckoutSessionRequest, GatewayError, GatewayLineItem, GatewayResult,
    PaymentGateway,
};
pub use manifest::{
    ManifestCodec, OrderManifest, SessionMetadata, ShowingQuantity, MANIFEST_VERSION,
    MAX_TICKETS_PER_ORDER,
};
pub use types::{
    normalize_email, AlertId, AlertKind, AlertStatus, ContactInfo, Customer, CustomerId,
    CustomerProfile, Donation, DonationId, Money, NewAlert, NewDonation, NewTicket,
    OperatorAlert, PaymentEventId, PaymentOutcome, ProcessedPaymentEvent, Showing, ShowingId,
    Ticket, TicketId, TicketTypeId,
};
