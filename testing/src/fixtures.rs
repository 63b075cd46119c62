//! Test data builders

#![allow(clippy::expect_used)] // Fixtures are built from known-good literals
#![allow(clippy::missing_panics_doc)]

use boxoffice_core::{
    AlertKind, Clock, ContactInfo, CustomerId, ManifestCodec, Money, NewAlert, NotificationKind,
    OrderManifest, PaymentEventId, PaymentNotification, PaymentOutcome, ProcessedPaymentEvent,
    SessionMetadata, Showing, ShowingId, ShowingQuantity,
};

use crate::mocks::test_clock;

/// Signing key shared by test codecs
pub const TEST_SIGNING_KEY: &str = "test-manifest-signing-key";

/// A codec on [`TEST_SIGNING_KEY`]
#[must_use]
pub fn codec() -> ManifestCodec {
    ManifestCodec::new(TEST_SIGNING_KEY)
}

/// An on-sale showing with every seat available
#[must_use]
pub const fn showing(id: i64, capacity: u32) -> Showing {
    Showing {
        id: ShowingId::new(id),
        total_seats: capacity,
        available_seats: capacity,
        sale_enabled: true,
    }
}

/// Contact details for `email` named "Ada Lovelace"
#[must_use]
pub fn contact(email: &str) -> ContactInfo {
    ContactInfo {
        email: email.to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        phone: Some("555-0100".to_string()),
        address: Some("12 Analytical Row".to_string()),
        newsletter_opt_in: false,
        seating_accommodation: None,
    }
}

/// A payment reference
#[must_use]
pub fn event_id(raw: &str) -> PaymentEventId {
    PaymentEventId::parse(raw).expect("fixture payment ids are valid")
}

/// A manifest for `lines` of `(showing, quantity)`
#[must_use]
pub fn manifest(customer_id: CustomerId, lines: &[(i64, u32)], donation: Money) -> OrderManifest {
    OrderManifest::build(
        lines.iter().map(|&(showing, quantity)| ShowingQuantity {
            showing_id: ShowingId::new(showing),
            quantity,
        }),
        customer_id,
        donation,
        false,
        "ord_fixture",
    )
    .expect("fixture manifests are valid")
}

/// Session metadata signed with [`codec`]
#[must_use]
pub fn signed(manifest: &OrderManifest) -> SessionMetadata {
    codec().encode(manifest).expect("fixture manifests encode")
}

/// A `succeeded` notification carrying `manifest`
#[must_use]
pub fn succeeded(event: &str, manifest: &OrderManifest) -> PaymentNotification {
    PaymentNotification {
        event_id: event_id(event),
        kind: NotificationKind::Succeeded,
        metadata: Some(signed(manifest)),
    }
}

/// A `refunded` notification
#[must_use]
pub fn refunded(event: &str) -> PaymentNotification {
    PaymentNotification {
        event_id: event_id(event),
        kind: NotificationKind::Refunded,
        metadata: None,
    }
}

/// An idempotency record with nothing issued
#[must_use]
pub fn processed_event(
    event: &str,
    customer_id: CustomerId,
    outcome: PaymentOutcome,
) -> ProcessedPaymentEvent {
    let now = test_clock().now();
    ProcessedPaymentEvent {
        event_id: event_id(event),
        outcome,
        customer_id,
        showing_quantities: Vec::new(),
        ticket_ids: Vec::new(),
        donation_id: None,
        order_ref: Some("ord_fixture".to_string()),
        processed_at: now,
        updated_at: now,
    }
}

/// A capacity alert for `event`
#[must_use]
pub fn alert(event: &str) -> NewAlert {
    NewAlert {
        kind: AlertKind::CapacityExceeded,
        payment_event_id: event_id(event),
        message: format!("Payment {event} could not be seated"),
        details: None,
    }
}
