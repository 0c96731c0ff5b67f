//! Core type definitions for fiscal documents.
//!
//! These types form the vocabulary of every document the pipeline touches.
//! Monetary values are integer centavos and quantities integer thousandths
//! throughout; nothing here will ever hand you a float.

use crate::config::{self, Environment};
use crate::document::access_key::AccessKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// DocumentKind
// ---------------------------------------------------------------------------

/// Discriminant for the two fiscal document variants.
///
/// The kind decides the document's model code, its XML vocabulary, and
/// which government system ultimately receives it. Everything else in the
/// pipeline is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Goods invoice: circulation of merchandise.
    Goods,
    /// Service invoice: provision of services.
    Service,
}

impl DocumentKind {
    /// Two-digit model code, the fourth field of the access key.
    pub fn model_code(&self) -> &'static str {
        match self {
            Self::Goods => config::MODEL_GOODS,
            Self::Service => config::MODEL_SERVICE,
        }
    }

    /// Inverse of [`model_code`](Self::model_code).
    pub fn from_model_code(code: &str) -> Option<Self> {
        match code {
            config::MODEL_GOODS => Some(Self::Goods),
            config::MODEL_SERVICE => Some(Self::Service),
            _ => None,
        }
    }

    /// Root element name of the standalone document.
    pub fn root_tag(&self) -> &'static str {
        match self {
            Self::Goods => "NFe",
            Self::Service => "NFSe",
        }
    }

    /// Name of the identified element the signature covers.
    pub fn inf_tag(&self) -> &'static str {
        match self {
            Self::Goods => "infNFe",
            Self::Service => "infNFSe",
        }
    }

    /// Root element name of the final signed+protocoled bundle.
    pub fn bundle_tag(&self) -> &'static str {
        match self {
            Self::Goods => "nfeProc",
            Self::Service => "nfseProc",
        }
    }

    /// Element name of the authority protocol node inside the bundle.
    pub fn protocol_tag(&self) -> &'static str {
        match self {
            Self::Goods => "protNFe",
            Self::Service => "protNFSe",
        }
    }

    /// XML namespace for this variant's documents and envelopes.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Goods => config::NAMESPACE_GOODS,
            Self::Service => config::NAMESPACE_SERVICE,
        }
    }

    /// Prefix for the `Id` attribute of the identified element.
    pub fn id_prefix(&self) -> &'static str {
        self.root_tag()
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Goods => write!(f, "goods"),
            Self::Service => write!(f, "service"),
        }
    }
}

// ---------------------------------------------------------------------------
// Party
// ---------------------------------------------------------------------------

/// One side of a fiscal document: the issuer or the recipient.
///
/// Only the tax id and the legal name are mandatory. Address fields are
/// optional because the renderer substitutes placeholders, and because the
/// authority's own minimum differs between the two document variants.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Party {
    /// Tax identifier: 14 digits for companies, 11 for natural persons.
    pub tax_id: String,
    /// Legal name.
    pub name: String,
    /// State registration number, where the party has one.
    #[serde(default)]
    pub state_registration: Option<String>,
    /// Street and number.
    #[serde(default)]
    pub street: Option<String>,
    /// Municipality name.
    #[serde(default)]
    pub municipality: Option<String>,
    /// Two-letter region code.
    #[serde(default)]
    pub region: Option<String>,
    /// Postal code, 8 digits.
    #[serde(default)]
    pub postal_code: Option<String>,
}

// ---------------------------------------------------------------------------
// Line items
// ---------------------------------------------------------------------------

/// A line item as supplied by the caller. The total is deliberately absent:
/// it is always computed, never accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemPayload {
    /// Internal product or service code.
    pub code: String,
    /// Human-readable description.
    pub description: String,
    /// Commercial unit of measure.
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Quantity in thousandths. `1500` means 1.500 units.
    pub quantity_milli: u64,
    /// Unit value in centavos.
    pub unit_value_cents: u64,
}

fn default_unit() -> String {
    "UN".to_string()
}

/// A validated line item with its computed total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub code: String,
    pub description: String,
    pub unit: String,
    pub quantity_milli: u64,
    pub unit_value_cents: u64,
    /// Always `item_total_cents(quantity_milli, unit_value_cents)`.
    pub total_cents: u64,
}

/// Item total in centavos, rounding half up at the dropped third decimal.
///
/// Integer arithmetic keeps this exact and platform-independent, which the
/// totals invariant (document total equals the sum of item totals) depends
/// on.
pub fn item_total_cents(quantity_milli: u64, unit_value_cents: u64) -> u64 {
    (quantity_milli.saturating_mul(unit_value_cents) + 500) / 1000
}

// ---------------------------------------------------------------------------
// Numbering
// ---------------------------------------------------------------------------

/// The document-kind-specific numbering key: series plus sequential number.
///
/// Unique per issuer per kind. The access key embeds both fields, so two
/// documents sharing a numbering key would also collide on access keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Numbering {
    /// Series, up to three digits.
    pub series: u16,
    /// Sequential number within the series, up to nine digits.
    pub number: u32,
}

impl fmt::Display for Numbering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "series {} number {}", self.series, self.number)
    }
}

// ---------------------------------------------------------------------------
// Totals
// ---------------------------------------------------------------------------

/// The document's money summary.
///
/// `total_cents` is derived: items subtotal plus freight plus other charges
/// minus discount. The builder computes it and rejects payloads that declare
/// a different figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaxTotals {
    /// Tax calculation base.
    pub tax_base_cents: u64,
    /// Tax amount.
    pub tax_cents: u64,
    /// Freight charged to the recipient.
    pub freight_cents: u64,
    /// Discount granted.
    pub discount_cents: u64,
    /// Other incidental charges.
    pub other_cents: u64,
    /// Final document value.
    pub total_cents: u64,
}

// ---------------------------------------------------------------------------
// InvoicePayload
// ---------------------------------------------------------------------------

/// The JSON-shaped domain payload handed to the pipeline by the caller.
///
/// Fields the catalogue does not know yet land in `extras` and are carried
/// opaquely through to the emitted document instead of being dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoicePayload {
    pub kind: DocumentKind,
    pub series: u16,
    pub number: u32,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub issuer: Party,
    pub recipient: Party,
    pub items: Vec<LineItemPayload>,
    #[serde(default)]
    pub tax_base_cents: u64,
    #[serde(default)]
    pub tax_cents: u64,
    #[serde(default)]
    pub freight_cents: u64,
    #[serde(default)]
    pub discount_cents: u64,
    #[serde(default)]
    pub other_cents: u64,
    /// Caller's idea of the total, if any. Checked against the computed
    /// value; never trusted.
    #[serde(default)]
    pub declared_total_cents: Option<u64>,
    #[serde(default)]
    pub additional_info: Option<String>,
    /// Unknown fields, preserved verbatim.
    #[serde(flatten)]
    pub extras: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// FiscalDocumentDraft
// ---------------------------------------------------------------------------

/// The unsigned, fully validated, in-memory representation of one document.
///
/// Every derived field is already computed: item totals, the document
/// total, and the access key. From here on the draft is treated as
/// immutable; changing anything means building again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalDocumentDraft {
    pub kind: DocumentKind,
    pub schema_version: String,
    pub environment: Environment,
    pub numbering: Numbering,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub issuer: Party,
    pub recipient: Party,
    pub items: Vec<LineItem>,
    pub totals: TaxTotals,
    pub additional_info: Option<String>,
    pub extras: BTreeMap<String, serde_json::Value>,
    pub access_key: AccessKey,
}

impl FiscalDocumentDraft {
    /// Sum of all item totals, before freight, discounts, and other charges.
    pub fn subtotal_cents(&self) -> u64 {
        self.items.iter().map(|item| item.total_cents).sum()
    }

    /// The `Id` attribute of the identified element, e.g. `NFe3524…`.
    pub fn document_id(&self) -> String {
        format!("{}{}", self.kind.id_prefix(), self.access_key.as_str())
    }

    /// The numbering key this draft occupies in the uniqueness registry.
    pub fn numbering_key(&self) -> crate::document::numbering::NumberingKey {
        crate::document::numbering::NumberingKey {
            issuer_tax_id: self.issuer.tax_id.clone(),
            kind: self.kind,
            series: self.numbering.series,
            number: self.numbering.number,
        }
    }
}

// ---------------------------------------------------------------------------
// Money formatting
// ---------------------------------------------------------------------------

/// Formats centavos as a decimal string with two places: `123456` → `"1234.56"`.
pub fn format_cents(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

/// Formats thousandths as a decimal string with three places: `1500` → `"1.500"`.
pub fn format_milli(milli: u64) -> String {
    format!("{}.{:03}", milli / 1000, milli % 1000)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
