//! Checkout Session Builder.
//!
//! Turns a cart and contact details into a hosted payment session. Prices
//! come from the [`PriceCatalog`], never from the client. No seats are held:
//! capacity is enforced when the payment notification arrives.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use boxoffice_core::{
    normalize_email, BoxOfficeError, CheckoutSession, CheckoutSessionRequest, ContactInfo,
    CustomerDirectory, CustomerId, GatewayError, GatewayLineItem, ManifestCodec, Money,
    OrderManifest, PaymentGateway, PriceCatalog, PriceQuote, QuoteLookup, ShowingId,
    ShowingQuantity, TicketTypeId, MAX_TICKETS_PER_ORDER,
};

use crate::metrics::CheckoutMetrics;

/// One cart line as submitted by the client.
///
/// Only the showing, the tier and the quantity are read; anything else the
/// client sends (prices included) is ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Showing to admit to
    pub showing_id: ShowingId,
    /// Units; validated to be positive
    pub quantity: i64,
    /// Price tier; the showing's default tier when absent
    #[serde(default)]
    pub ticket_type_id: Option<TicketTypeId>,
}

/// A checkout submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// Cart lines
    pub cart: Vec<CartLine>,
    /// Purchaser
    pub contact: ContactInfo,
    /// Optional donation in cents
    #[serde(default)]
    pub donation_cents: i64,
    /// Hide the donor's name
    #[serde(default)]
    pub anonymous_donation: bool,
}

/// Static checkout settings.
#[derive(Clone, Debug)]
pub struct CheckoutSettings {
    /// Redirect after payment
    pub success_url: String,
    /// Redirect after abandoning payment
    pub cancel_url: String,
    /// ISO currency code
    pub currency: String,
    /// Deadline for the gateway call
    pub gateway_timeout: Duration,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            success_url: "http://localhost:3000/success".to_string(),
            cancel_url: "http://localhost:3000/cancel".to_string(),
            currency: "usd".to_string(),
            gateway_timeout: Duration::from_secs(10),
        }
    }
}

/// What a successful checkout produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    /// Hosted payment session
    pub session: CheckoutSession,
    /// Reference embedded in the manifest
    pub order_ref: String,
    /// Resolved purchaser
    pub customer_id: CustomerId,
    /// Amount the payer will be asked for
    pub total: Money,
}

/// Builds hosted payment sessions.
#[derive(Clone)]
pub struct CheckoutSessionBuilder {
    customers: Arc<dyn CustomerDirectory>,
    catalog: Arc<dyn PriceCatalog>,
    gateway: Arc<dyn PaymentGateway>,
    codec: ManifestCodec,
    settings: CheckoutSettings,
}

struct PricedLine {
    quote: PriceQuote,
    quantity: u32,
}

impl CheckoutSessionBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(
        customers: Arc<dyn CustomerDirectory>,
        catalog: Arc<dyn PriceCatalog>,
        gateway: Arc<dyn PaymentGateway>,
        codec: ManifestCodec,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            customers,
            catalog,
            gateway,
            codec,
            settings,
        }
    }

    /// Prices the cart, resolves the customer, signs the manifest and opens a
    /// payment session.
    ///
    /// The customer row is only written once the cart has passed every
    /// catalog check.
    ///
    /// # Errors
    ///
    /// - [`BoxOfficeError::Validation`] for bad contact details, an empty or
    ///   malformed cart, an unknown, unpriced or unsellable showing, or a
    ///   request for more seats than remain
    /// - [`BoxOfficeError::GatewayUnavailable`] if the gateway is down or
    ///   times out
    /// - [`BoxOfficeError::GatewayRejected`] if the gateway refuses the
    ///   session request
    /// - [`BoxOfficeError::TransientStore`] / [`BoxOfficeError::Store`] if the
    ///   price lookup or customer upsert fails
    #[tracing::instrument(skip_all, fields(cart_lines = request.cart.len()))]
    pub async fn create_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutReceipt, BoxOfficeError> {
        let started = Instant::now();
        let result = self.build(request).await;
        match &result {
            Ok(receipt) => {
                CheckoutMetrics::record_created(started.elapsed());
                tracing::info!(
                    customer_id = %receipt.customer_id,
                    session_id = %receipt.session.session_id,
                    order_ref = %receipt.order_ref,
                    total = %receipt.total,
                    "Checkout session created"
                );
            }
            Err(err) => {
                CheckoutMetrics::record_failure(failure_reason(err));
                tracing::warn!(error = %err, "Checkout failed");
            }
        }
        result
    }

    async fn build(&self, request: CheckoutRequest) -> Result<CheckoutReceipt, BoxOfficeError> {
        let email = validate_contact(&request.contact)?;
        let lines = validate_cart(&request.cart)?;
        let donation = validate_donation(request.donation_cents)?;

        let priced = self.price(&lines).await?;
        check_availability(&priced)?;

        let customer_id = self
            .customers
            .resolve(&email, &request.contact.profile())
            .await?;

        let order_ref = uuid::Uuid::new_v4().to_string();
        let manifest = OrderManifest::build(
            priced.iter().map(|line| ShowingQuantity {
                showing_id: line.quote.showing_id,
                quantity: line.quantity,
            }),
            customer_id,
            donation,
            request.anonymous_donation,
            order_ref.clone(),
        )?;

        let mut line_items: Vec<GatewayLineItem> = priced
            .iter()
            .map(|line| GatewayLineItem {
                name: line.quote.description.clone(),
                description: Some(format!("Showing {}", line.quote.showing_id)),
                unit_amount: line.quote.unit_price,
                quantity: line.quantity,
            })
            .collect();
        if !donation.is_zero() {
            line_items.push(GatewayLineItem {
                name: "Donation".to_string(),
                description: None,
                unit_amount: donation,
                quantity: 1,
            });
        }

        let session_request = CheckoutSessionRequest {
            client_reference_id: order_ref.clone(),
            customer_email: email,
            line_items,
            metadata: self.codec.encode(&manifest)?,
            success_url: self.settings.success_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
            currency: self.settings.currency.clone(),
        };
        let total = session_request
            .total()
            .ok_or_else(|| BoxOfficeError::Validation("order total overflows".to_string()))?;

        let session = match tokio::time::timeout(
            self.settings.gateway_timeout,
            self.gateway.create_checkout_session(session_request),
        )
        .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => return Err(gateway_error(err)),
            Err(_) => return Err(gateway_error(GatewayError::Timeout)),
        };

        Ok(CheckoutReceipt {
            session,
            order_ref,
            customer_id,
            total,
        })
    }

    /// Looks up the authoritative price of every line, merging lines for the
    /// same showing and tier.
    async fn price(
        &self,
        lines: &BTreeMap<(ShowingId, Option<TicketTypeId>), u32>,
    ) -> Result<Vec<PricedLine>, BoxOfficeError> {
        let mut priced: Vec<PricedLine> = Vec::with_capacity(lines.len());
        for (&(showing_id, ticket_type), &quantity) in lines {
            let quote = match self.catalog.quote(showing_id, ticket_type).await? {
                QuoteLookup::Priced(quote) => quote,
                QuoteLookup::UnknownShowing => {
                    return Err(BoxOfficeError::Validation(format!(
                        "unknown showing {showing_id}"
                    )));
                }
                QuoteLookup::NoTier => {
                    return Err(BoxOfficeError::Validation(match ticket_type {
                        Some(tier) => {
                            format!("ticket type {tier} is not sold for showing {showing_id}")
                        }
                        None => format!("showing {showing_id} has no priced ticket types"),
                    }));
                }
            };
            if !quote.sale_enabled {
                return Err(BoxOfficeError::Validation(format!(
                    "showing {showing_id} is not on sale"
                )));
            }

            // An explicit and a defaulted line may resolve to the same tier.
            if let Some(existing) = priced.iter_mut().find(|p| {
                p.quote.showing_id == quote.showing_id
                    && p.quote.ticket_type_id == quote.ticket_type_id
            }) {
                existing.quantity = existing.quantity.saturating_add(quantity);
            } else {
                priced.push(PricedLine { quote, quantity });
            }
        }
        Ok(priced)
    }
}

fn validate_contact(contact: &ContactInfo) -> Result<String, BoxOfficeError> {
    let email = normalize_email(&contact.email);
    let Some((local, domain)) = email.split_once('@') else {
        return Err(BoxOfficeError::Validation(
            "a valid email address is required".to_string(),
        ));
    };
    if local.is_empty() || domain.is_empty() {
        return Err(BoxOfficeError::Validation(
            "a valid email address is required".to_string(),
        ));
    }
    if contact.full_name().is_empty() {
        return Err(BoxOfficeError::Validation("a name is required".to_string()));
    }
    Ok(email)
}

fn validate_cart(
    cart: &[CartLine],
) -> Result<BTreeMap<(ShowingId, Option<TicketTypeId>), u32>, BoxOfficeError> {
    if cart.is_empty() {
        return Err(BoxOfficeError::Validation("cart is empty".to_string()));
    }

    let mut lines = BTreeMap::new();
    for line in cart {
        let quantity = u32::try_from(line.quantity)
            .ok()
            .filter(|q| (1..=MAX_TICKETS_PER_ORDER).contains(q))
            .ok_or_else(|| {
                BoxOfficeError::Validation(format!(
                    "quantity for showing {} must be between 1 and {MAX_TICKETS_PER_ORDER}",
                    line.showing_id
                ))
            })?;
        let total: &mut u32 = lines
            .entry((line.showing_id, line.ticket_type_id))
            .or_insert(0);
        *total = total.saturating_add(quantity);
    }

    let units = lines.values().fold(0u32, |sum, q| sum.saturating_add(*q));
    if units > MAX_TICKETS_PER_ORDER {
        return Err(BoxOfficeError::Validation(format!(
            "order of {units} tickets exceeds the limit of {MAX_TICKETS_PER_ORDER}"
        )));
    }
    Ok(lines)
}

fn validate_donation(cents: i64) -> Result<Money, BoxOfficeError> {
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| BoxOfficeError::Validation("donation must not be negative".to_string()))
}

/// Advisory pre-check against the seat counts read with the prices.
fn check_availability(priced: &[PricedLine]) -> Result<(), BoxOfficeError> {
    let mut per_showing: BTreeMap<ShowingId, (u32, u32)> = BTreeMap::new();
    for line in priced {
        let entry = per_showing
            .entry(line.quote.showing_id)
            .or_insert((0, line.quote.available_seats));
        entry.0 = entry.0.saturating_add(line.quantity);
    }
    for (showing_id, (requested, available)) in per_showing {
        if requested > available {
            return Err(BoxOfficeError::Validation(format!(
                "not enough seats remaining for showing {showing_id}: {available} left, {requested} requested"
            )));
        }
    }
    Ok(())
}

fn gateway_error(err: GatewayError) -> BoxOfficeError {
    match err {
        GatewayError::Rejected { .. } => BoxOfficeError::GatewayRejected(err.to_string()),
        GatewayError::Unavailable { .. } | GatewayError::Timeout => {
            BoxOfficeError::GatewayUnavailable(err.to_string())
        }
    }
}

const fn failure_reason(err: &BoxOfficeError) -> &'static str {
    match err {
        BoxOfficeError::Validation(_) | BoxOfficeError::CapacityExceeded { .. } => "validation",
        BoxOfficeError::GatewayUnavailable(_) | BoxOfficeError::GatewayRejected(_) => "gateway",
        BoxOfficeError::TransientStore(_) | BoxOfficeError::Store(_) => "store",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(email: &str, first: &str) -> ContactInfo {
        ContactInfo {
            email: email.to_string(),
            first_name: first.to_string(),
            last_name: String::new(),
            phone: None,
            address: None,
            newsletter_opt_in: false,
            seating_accommodation: None,
        }
    }

    fn cart_line(showing: i64, quantity: i64) -> CartLine {
        CartLine {
            showing_id: ShowingId::new(showing),
            quantity,
            ticket_type_id: None,
        }
    }

    #[test]
    fn contact_requires_email_and_name() {
        assert!(validate_contact(&contact("nobody", "Ada")).is_err());
        assert!(validate_contact(&contact("@example.com", "Ada")).is_err());
        assert!(validate_contact(&contact("ada@example.com", "  ")).is_err());
        assert_eq!(
            validate_contact(&contact(" Ada@Example.com ", "Ada")).ok(),
            Some("ada@example.com".to_string())
        );
    }

    #[test]
    fn cart_rejects_empty_and_non_positive_quantities() {
        assert!(validate_cart(&[]).is_err());
        assert!(validate_cart(&[cart_line(1, 0)]).is_err());
        assert!(validate_cart(&[cart_line(1, -2)]).is_err());
        assert!(validate_cart(&[cart_line(1, i64::from(MAX_TICKETS_PER_ORDER) + 1)]).is_err());
    }

    #[test]
    fn cart_merges_repeated_lines() {
        let lines = validate_cart(&[cart_line(7, 1), cart_line(7, 2), cart_line(3, 1)]);
        let lines = lines.ok().unwrap_or_default();
        assert_eq!(lines.get(&(ShowingId::new(7), None)), Some(&3));
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn cart_caps_units_across_lines() {
        let half = i64::from(MAX_TICKETS_PER_ORDER / 2);
        assert!(validate_cart(&[cart_line(1, half), cart_line(2, half)]).is_ok());
        assert!(validate_cart(&[cart_line(1, half), cart_line(2, half + 1)]).is_err());
    }

    #[test]
    fn only_refusals_are_final() {
        let rejected = gateway_error(GatewayError::Rejected {
            status: 400,
            message: "invalid currency".to_string(),
        });
        assert!(matches!(rejected, BoxOfficeError::GatewayRejected(_)));
        assert!(!rejected.is_retryable());

        assert!(gateway_error(GatewayError::Timeout).is_retryable());
        assert!(gateway_error(GatewayError::Unavailable {
            message: "502".to_string()
        })
        .is_retryable());
    }

    #[test]
    fn negative_donation_is_rejected() {
        assert!(validate_donation(-1).is_err());
        assert_eq!(validate_donation(2_500).ok(), Some(Money::from_cents(2_500)));
    }
}
