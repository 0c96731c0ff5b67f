//! Draft construction via the builder pattern.
//!
//! The [`DraftBuilder`] enforces a disciplined construction flow: set the
//! fields, call `.build()`, and get back a [`FiscalDocumentDraft`] with
//! every derived field computed, or a [`ValidationError`] listing every
//! rejected field at once.
//!
//! The builder does not sign. That happens in [`crate::sign`]. The
//! separation keeps construction testable without key material.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::config::{self, EmitterConfig};
use crate::document::access_key::AccessKey;
use crate::document::types::{
    item_total_cents, DocumentKind, FiscalDocumentDraft, InvoicePayload, LineItem,
    LineItemPayload, Numbering, Party, TaxTotals,
};

/// How far into the future an emission timestamp may sit before the builder
/// rejects it. Covers honest clock skew without accepting tomorrow's
/// documents today.
const MAX_FUTURE_SKEW_MINUTES: i64 = 5;

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// One rejected field: its path in the payload and a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldProblem {
    /// Field path, e.g. `items[2].quantity_milli`.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldProblem {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A structured validation failure carrying every rejected field.
///
/// The builder never stops at the first problem; callers fix their payload
/// in one round trip instead of playing whack-a-mole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid document payload: {} field(s) rejected", .problems.len())]
pub struct ValidationError {
    pub problems: Vec<FieldProblem>,
}

impl ValidationError {
    /// An error for a single field, for layers that check one thing.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            problems: vec![FieldProblem::new(field, message)],
        }
    }

    /// The rejected field paths, in payload order.
    pub fn fields(&self) -> Vec<&str> {
        self.problems.iter().map(|p| p.field.as_str()).collect()
    }

    /// Whether any problem names the given field path.
    pub fn mentions(&self, field: &str) -> bool {
        self.problems.iter().any(|p| p.field == field)
    }
}

// ---------------------------------------------------------------------------
// DraftBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`FiscalDocumentDraft`] instances.
///
/// # Usage
///
/// ```rust,no_run
/// use lavra_pipeline::config::{EmitterConfig, Environment};
/// use lavra_pipeline::document::{DraftBuilder, DocumentKind, LineItemPayload, Party};
///
/// let config = EmitterConfig::new(
///     Environment::Homologation, 35, "12345678000195",
///     "/etc/lavra/key.sealed", "/etc/lavra/cert.json", "passphrase",
/// );
/// let draft = DraftBuilder::new(DocumentKind::Goods)
///     .series(1)
///     .number(101)
///     .issuer(Party { tax_id: "12345678000195".into(), name: "ACME LTDA".into(), ..Party::default() })
///     .recipient(Party { tax_id: "98765432000109".into(), name: "Cliente SA".into(), ..Party::default() })
///     .item(LineItemPayload {
///         code: "P1".into(), description: "Widget".into(), unit: "UN".into(),
///         quantity_milli: 2000, unit_value_cents: 1550,
///     })
///     .build(&config);
/// ```
///
/// `build` validates every field in one pass, recomputes every derived
/// value, and stamps the access key.
pub struct DraftBuilder {
    kind: DocumentKind,
    series: u16,
    number: u32,
    issued_at: Option<chrono::DateTime<Utc>>,
    issuer: Party,
    recipient: Party,
    items: Vec<LineItemPayload>,
    tax_base_cents: u64,
    tax_cents: u64,
    freight_cents: u64,
    discount_cents: u64,
    other_cents: u64,
    declared_total_cents: Option<u64>,
    additional_info: Option<String>,
    extras: BTreeMap<String, serde_json::Value>,
}

impl DraftBuilder {
    /// Creates a new builder for the given document kind.
    ///
    /// Defaults: all money fields zero, `issued_at` stamped at build time
    /// unless set explicitly.
    pub fn new(kind: DocumentKind) -> Self {
        Self {
            kind,
            series: 0,
            number: 0,
            issued_at: None,
            issuer: Party::default(),
            recipient: Party::default(),
            items: Vec::new(),
            tax_base_cents: 0,
            tax_cents: 0,
            freight_cents: 0,
            discount_cents: 0,
            other_cents: 0,
            declared_total_cents: None,
            additional_info: None,
            extras: BTreeMap::new(),
        }
    }

    /// Seeds a builder from a caller payload, field for field.
    pub fn from_payload(payload: &InvoicePayload) -> Self {
        Self {
            kind: payload.kind,
            series: payload.series,
            number: payload.number,
            issued_at: Some(payload.issued_at),
            issuer: payload.issuer.clone(),
            recipient: payload.recipient.clone(),
            items: payload.items.clone(),
            tax_base_cents: payload.tax_base_cents,
            tax_cents: payload.tax_cents,
            freight_cents: payload.freight_cents,
            discount_cents: payload.discount_cents,
            other_cents: payload.other_cents,
            declared_total_cents: payload.declared_total_cents,
            additional_info: payload.additional_info.clone(),
            extras: payload.extras.clone(),
        }
    }

    pub fn series(mut self, series: u16) -> Self {
        self.series = series;
        self
    }

    pub fn number(mut self, number: u32) -> Self {
        self.number = number;
        self
    }

    /// Sets the emission timestamp explicitly. If not called, `build` uses
    /// the current UTC time.
    pub fn issued_at(mut self, issued_at: chrono::DateTime<Utc>) -> Self {
        self.issued_at = Some(issued_at);
        self
    }

    pub fn issuer(mut self, issuer: Party) -> Self {
        self.issuer = issuer;
        self
    }

    pub fn recipient(mut self, recipient: Party) -> Self {
        self.recipient = recipient;
        self
    }

    /// Appends one line item.
    pub fn item(mut self, item: LineItemPayload) -> Self {
        self.items.push(item);
        self
    }

    pub fn tax_base_cents(mut self, cents: u64) -> Self {
        self.tax_base_cents = cents;
        self
    }

    pub fn tax_cents(mut self, cents: u64) -> Self {
        self.tax_cents = cents;
        self
    }

    pub fn freight_cents(mut self, cents: u64) -> Self {
        self.freight_cents = cents;
        self
    }

    pub fn discount_cents(mut self, cents: u64) -> Self {
        self.discount_cents = cents;
        self
    }

    pub fn other_cents(mut self, cents: u64) -> Self {
        self.other_cents = cents;
        self
    }

    /// Declares the caller's expected total, to be checked against the
    /// computed one.
    pub fn declared_total_cents(mut self, cents: u64) -> Self {
        self.declared_total_cents = Some(cents);
        self
    }

    pub fn additional_info(mut self, info: impl Into<String>) -> Self {
        self.additional_info = Some(info.into());
        self
    }

    /// Attaches an opaque pass-through field.
    pub fn extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    /// Consumes the builder and produces a validated draft.
    ///
    /// Validation runs over every field before returning, so the error
    /// lists all problems in one pass. On success every derived field is
    /// already computed: item totals, the document total, and the access
    /// key.
    pub fn build(self, emitter: &EmitterConfig) -> Result<FiscalDocumentDraft, ValidationError> {
        let mut problems: Vec<FieldProblem> = Vec::new();
        let issued_at = self.issued_at.unwrap_or_else(Utc::now);

        self.validate_numbering(&mut problems);
        self.validate_party("issuer", &self.issuer, &mut problems);
        self.validate_party("recipient", &self.recipient, &mut problems);
        self.validate_issuer_matches_emitter(emitter, &mut problems);
        self.validate_items(&mut problems);
        self.validate_additional_info(&mut problems);

        if issued_at > Utc::now() + ChronoDuration::minutes(MAX_FUTURE_SKEW_MINUTES) {
            problems.push(FieldProblem::new(
                "issued_at",
                "emission timestamp lies in the future",
            ));
        }

        // Derived money figures. Totals are computed, never accepted.
        let items: Vec<LineItem> = self
            .items
            .iter()
            .map(|item| LineItem {
                code: item.code.clone(),
                description: item.description.clone(),
                unit: item.unit.clone(),
                quantity_milli: item.quantity_milli,
                unit_value_cents: item.unit_value_cents,
                total_cents: item_total_cents(item.quantity_milli, item.unit_value_cents),
            })
            .collect();
        let subtotal: u64 = items.iter().map(|i| i.total_cents).sum();
        let gross = subtotal + self.freight_cents + self.other_cents;

        if self.discount_cents > gross {
            problems.push(FieldProblem::new(
                "discount_cents",
                "discount exceeds the document value",
            ));
        }
        let total_cents = gross.saturating_sub(self.discount_cents);

        if let Some(declared) = self.declared_total_cents {
            if declared != total_cents {
                problems.push(FieldProblem::new(
                    "declared_total_cents",
                    format!("declared {} but computed {}", declared, total_cents),
                ));
            }
        }

        if !problems.is_empty() {
            return Err(ValidationError { problems });
        }

        let numbering = Numbering {
            series: self.series,
            number: self.number,
        };
        let access_key = AccessKey::compute(
            emitter.region_code,
            &self.issuer.tax_id,
            self.kind,
            numbering,
            issued_at,
        )
        .map_err(|e| ValidationError::single("access_key", e.to_string()))?;

        Ok(FiscalDocumentDraft {
            kind: self.kind,
            schema_version: config::SCHEMA_VERSION.to_string(),
            environment: emitter.environment,
            numbering,
            issued_at,
            issuer: self.issuer,
            recipient: self.recipient,
            items,
            totals: TaxTotals {
                tax_base_cents: self.tax_base_cents,
                tax_cents: self.tax_cents,
                freight_cents: self.freight_cents,
                discount_cents: self.discount_cents,
                other_cents: self.other_cents,
                total_cents,
            },
            additional_info: self.additional_info,
            extras: self.extras,
            access_key,
        })
    }

    fn validate_numbering(&self, problems: &mut Vec<FieldProblem>) {
        if self.series > 999 {
            problems.push(FieldProblem::new("series", "series exceeds three digits"));
        }
        if self.number == 0 {
            problems.push(FieldProblem::new("number", "number must be positive"));
        }
        if self.number > 999_999_999 {
            problems.push(FieldProblem::new("number", "number exceeds nine digits"));
        }
    }

    fn validate_party(&self, prefix: &str, party: &Party, problems: &mut Vec<FieldProblem>) {
        let digits = party.tax_id.chars().all(|c| c.is_ascii_digit());
        let tax_id_field = format!("{prefix}.tax_id");
        if party.tax_id.is_empty() {
            problems.push(FieldProblem::new(tax_id_field, "tax id is required"));
        } else if !digits {
            problems.push(FieldProblem::new(tax_id_field, "tax id must be numeric"));
        } else {
            let len = party.tax_id.len();
            let valid_len = match prefix {
                // The issuer is always a company.
                "issuer" => len == 14,
                _ => len == 11 || len == 14,
            };
            if !valid_len {
                problems.push(FieldProblem::new(
                    tax_id_field,
                    "tax id must be 14 digits (company) or 11 digits (person)",
                ));
            }
        }

        if party.name.trim().is_empty() {
            problems.push(FieldProblem::new(
                format!("{prefix}.name"),
                "name is required",
            ));
        }

        if let Some(postal) = &party.postal_code {
            if postal.len() != 8 || !postal.chars().all(|c| c.is_ascii_digit()) {
                problems.push(FieldProblem::new(
                    format!("{prefix}.postal_code"),
                    "postal code must be 8 digits",
                ));
            }
        }
        if let Some(region) = &party.region {
            if region.len() != 2 || !region.chars().all(|c| c.is_ascii_uppercase()) {
                problems.push(FieldProblem::new(
                    format!("{prefix}.region"),
                    "region must be a two-letter uppercase code",
                ));
            }
        }
    }

    fn validate_issuer_matches_emitter(
        &self,
        emitter: &EmitterConfig,
        problems: &mut Vec<FieldProblem>,
    ) {
        // The signing certificate is bound to the configured emitter; a
        // draft issued by anyone else could never be authorized.
        if !self.issuer.tax_id.is_empty()
            && !emitter.issuer_tax_id.is_empty()
            && self.issuer.tax_id != emitter.issuer_tax_id
        {
            problems.push(FieldProblem::new(
                "issuer.tax_id",
                "does not match the configured emitter",
            ));
        }
    }

    fn validate_items(&self, problems: &mut Vec<FieldProblem>) {
        if self.items.is_empty() {
            problems.push(FieldProblem::new(
                "items",
                "at least one line item is required",
            ));
            return;
        }
        if self.items.len() > config::MAX_LINE_ITEMS {
            problems.push(FieldProblem::new(
                "items",
                format!("more than {} line items", config::MAX_LINE_ITEMS),
            ));
        }
        for (index, item) in self.items.iter().enumerate() {
            if item.code.trim().is_empty() {
                problems.push(FieldProblem::new(
                    format!("items[{index}].code"),
                    "code is required",
                ));
            }
            if item.description.trim().is_empty() {
                problems.push(FieldProblem::new(
                    format!("items[{index}].description"),
                    "description is required",
                ));
            } else if item.description.chars().count() > config::MAX_DESCRIPTION_LENGTH {
                problems.push(FieldProblem::new(
                    format!("items[{index}].description"),
                    format!("longer than {} characters", config::MAX_DESCRIPTION_LENGTH),
                ));
            }
            if item.unit.trim().is_empty() {
                problems.push(FieldProblem::new(
                    format!("items[{index}].unit"),
                    "unit is required",
                ));
            }
            if item.quantity_milli == 0 {
                problems.push(FieldProblem::new(
                    format!("items[{index}].quantity_milli"),
                    "quantity must be positive",
                ));
            }
            if item.unit_value_cents == 0 {
                problems.push(FieldProblem::new(
                    format!("items[{index}].unit_value_cents"),
                    "unit value must be positive",
                ));
            }
        }
    }

    fn validate_additional_info(&self, problems: &mut Vec<FieldProblem>) {
        if let Some(info) = &self.additional_info {
            if info.chars().count() > config::MAX_ADDITIONAL_INFO_LENGTH {
                problems.push(FieldProblem::new(
                    "additional_info",
                    format!(
                        "longer than {} characters",
                        config::MAX_ADDITIONAL_INFO_LENGTH
                    ),
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
