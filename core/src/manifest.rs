//! The order manifest carried opaquely through the payment gateway.
//!
//! The checkout builder signs the manifest into session metadata; the
//! fulfillment engine only trusts metadata whose signature verifies and whose
//! contents validate. Tampered or malformed metadata is a validation error.
//!
//! ```text
//! metadata.manifest     = {"version":1,"showing_quantities":[...],...}
//! metadata.manifest_sig = hex(HMAC-SHA256(key, metadata.manifest))
//! ```

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::BoxOfficeError;
use crate::types::{CustomerId, Money, ShowingId};

/// Current manifest layout version.
pub const MANIFEST_VERSION: u16 = 1;

/// Upper bound on ticket units in one order.
pub const MAX_TICKETS_PER_ORDER: u32 = 100;

type HmacSha256 = Hmac<Sha256>;

/// Units requested for one showing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShowingQuantity {
    /// Showing
    pub showing_id: ShowingId,
    /// Units, always positive in a valid manifest
    pub quantity: u32,
}

/// What a paid order entitles the customer to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderManifest {
    /// Layout version, must equal [`MANIFEST_VERSION`]
    pub version: u16,
    /// Units per showing, one entry per showing, sorted by showing id
    pub showing_quantities: Vec<ShowingQuantity>,
    /// Purchasing customer
    pub customer_id: CustomerId,
    /// Donation attached to the order
    pub donation: Money,
    /// Hide the donor's name
    #[serde(default)]
    pub anonymous_donation: bool,
    /// Checkout reference the session was created under
    pub order_ref: String,
}

impl OrderManifest {
    /// Builds a manifest, aggregating quantities by showing.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::Validation`] for an empty cart, a zero
    /// quantity, or an order that is too large.
    pub fn build(
        lines: impl IntoIterator<Item = ShowingQuantity>,
        customer_id: CustomerId,
        donation: Money,
        anonymous_donation: bool,
        order_ref: impl Into<String>,
    ) -> Result<Self, BoxOfficeError> {
        let mut totals: BTreeMap<ShowingId, u32> = BTreeMap::new();
        for line in lines {
            if line.quantity == 0 {
                return Err(BoxOfficeError::Validation(format!(
                    "quantity for showing {} must be positive",
                    line.showing_id
                )));
            }
            let total = totals.entry(line.showing_id).or_insert(0);
            *total = total.checked_add(line.quantity).ok_or_else(|| {
                BoxOfficeError::Validation("order quantity overflow".to_string())
            })?;
        }

        let manifest = Self {
            version: MANIFEST_VERSION,
            showing_quantities: totals
                .into_iter()
                .map(|(showing_id, quantity)| ShowingQuantity {
                    showing_id,
                    quantity,
                })
                .collect(),
            customer_id,
            donation,
            anonymous_donation,
            order_ref: order_ref.into(),
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::Validation`] describing the first violation.
    pub fn validate(&self) -> Result<(), BoxOfficeError> {
        if self.version != MANIFEST_VERSION {
            return Err(BoxOfficeError::Validation(format!(
                "unsupported manifest version {}",
                self.version
            )));
        }
        if self.showing_quantities.is_empty() {
            return Err(BoxOfficeError::Validation(
                "manifest lists no showings".to_string(),
            ));
        }
        if self.order_ref.trim().is_empty() {
            return Err(BoxOfficeError::Validation(
                "manifest has no order reference".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        let mut units: u32 = 0;
        for line in &self.showing_quantities {
            if line.quantity == 0 {
                return Err(BoxOfficeError::Validation(format!(
                    "quantity for showing {} must be positive",
                    line.showing_id
                )));
            }
            if !seen.insert(line.showing_id) {
                return Err(BoxOfficeError::Validation(format!(
                    "showing {} listed twice",
                    line.showing_id
                )));
            }
            units = units.saturating_add(line.quantity);
        }
        if units > MAX_TICKETS_PER_ORDER {
            return Err(BoxOfficeError::Validation(format!(
                "order of {units} tickets exceeds the limit of {MAX_TICKETS_PER_ORDER}"
            )));
        }
        Ok(())
    }

    /// Total ticket units across all showings.
    #[must_use]
    pub fn units(&self) -> u32 {
        self.showing_quantities
            .iter()
            .fold(0u32, |acc, line| acc.saturating_add(line.quantity))
    }
}

/// The string entries attached to a gateway session and echoed back on its
/// notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Canonical manifest JSON
    pub manifest: String,
    /// Hex HMAC-SHA256 of `manifest`
    pub manifest_sig: String,
}

/// Signs and verifies manifests.
#[derive(Clone)]
pub struct ManifestCodec {
    key: Vec<u8>,
}

impl fmt::Debug for ManifestCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestCodec")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl ManifestCodec {
    /// Creates a codec with the server-side signing key.
    #[must_use]
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, BoxOfficeError> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| BoxOfficeError::Store(format!("Invalid manifest signing key: {e}")))
    }

    /// Serialises and signs a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::Validation`] if the manifest is invalid.
    pub fn encode(&self, manifest: &OrderManifest) -> Result<SessionMetadata, BoxOfficeError> {
        manifest.validate()?;
        let json = serde_json::to_string(manifest)
            .map_err(|e| BoxOfficeError::Validation(format!("manifest not serialisable: {e}")))?;

        let mut mac = self.mac()?;
        mac.update(json.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(SessionMetadata {
            manifest: json,
            manifest_sig: signature,
        })
    }

    /// Verifies, parses and validates echoed metadata.
    ///
    /// # Errors
    ///
    /// Returns [`BoxOfficeError::Validation`] if the signature does not
    /// verify, the JSON does not parse, or the manifest is invalid.
    pub fn decode(&self, metadata: &SessionMetadata) -> Result<OrderManifest, BoxOfficeError> {
        let signature = hex::decode(metadata.manifest_sig.trim()).map_err(|_| {
            BoxOfficeError::Validation("manifest signature is not hex".to_string())
        })?;

        let mut mac = self.mac()?;
        mac.update(metadata.manifest.as_bytes());
        mac.verify_slice(&signature).map_err(|_| {
            BoxOfficeError::Validation("manifest signature does not verify".to_string())
        })?;

        let manifest: OrderManifest = serde_json::from_str(&metadata.manifest)
            .map_err(|e| BoxOfficeError::Validation(format!("malformed manifest: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }
}
