//! Payment gateway seam.
//!
//! The gateway hosts the payment page. Checkout hands it priced line items and
//! the signed manifest; the gateway later echoes the manifest back on its
//! payment notifications.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

use crate::manifest::SessionMetadata;
use crate::types::Money;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Payment gateway error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network failure, 5xx or rate limit; safe to retry
    Unavailable {
        /// What went wrong
        message: String,
    },
    /// The gateway refused the request
    Rejected {
        /// Gateway status code
        status: u16,
        /// Gateway message
        message: String,
    },
    /// No answer within the configured deadline
    Timeout,
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "Gateway unavailable: {message}"),
            Self::Rejected { status, message } => {
                write!(f, "Gateway rejected request ({status}): {message}")
            }
            Self::Timeout => write!(f, "Gateway timeout"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// One priced line on the hosted payment page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayLineItem {
    /// Product name shown to the payer
    pub name: String,
    /// Longer description
    pub description: Option<String>,
    /// Server-side unit price
    pub unit_amount: Money,
    /// Units
    pub quantity: u32,
}

/// Request to open a hosted payment session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    /// Our order reference
    pub client_reference_id: String,
    /// Pre-filled payer email
    pub customer_email: String,
    /// Priced lines, tickets first then donation
    pub line_items: Vec<GatewayLineItem>,
    /// Signed manifest, echoed back on notifications
    pub metadata: SessionMetadata,
    /// Redirect after payment
    pub success_url: String,
    /// Redirect after abandoning payment
    pub cancel_url: String,
    /// ISO currency code
    pub currency: String,
}

impl CheckoutSessionRequest {
    /// Sum of all line items, `None` on overflow.
    #[must_use]
    pub fn total(&self) -> Option<Money> {
        self.line_items.iter().try_fold(Money::ZERO, |acc, item| {
            item.unit_amount
                .checked_mul(item.quantity)
                .and_then(|line| acc.checked_add(line))
        })
    }
}

/// An opened payment session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Gateway session id
    pub session_id: String,
    /// Hosted payment page
    pub url: Option<String>,
}

/// Payment gateway trait
///
/// Abstraction over hosted-checkout processors.
pub trait PaymentGateway: Send + Sync {
    /// Opens a hosted payment session
    ///
    /// # Errors
    ///
    /// Returns error if the gateway is unreachable or refuses the session
    fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<CheckoutSession>> + Send>>;
}
