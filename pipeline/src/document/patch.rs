//! Partial updates over an immutable prior payload.
//!
//! Update endpoints send only the fields they want to change. The merge
//! here is explicit about the difference between "absent" and "empty":
//! `None` keeps the prior value, `Some(v)` replaces it, and `v` may
//! legitimately be zero, empty, or false. Nothing in this module inspects
//! truthiness.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::document::types::{DocumentKind, InvoicePayload, LineItemPayload, Party};

/// A partial update to an [`InvoicePayload`].
///
/// Every field is optional. Omitted fields leave the prior snapshot
/// untouched. Collections (`items`, `extras`) replace wholesale when
/// present; element-level editing would reintroduce the ambiguity this
/// type exists to remove.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftPatch {
    #[serde(default)]
    pub kind: Option<DocumentKind>,
    #[serde(default)]
    pub series: Option<u16>,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub issued_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub issuer: Option<Party>,
    #[serde(default)]
    pub recipient: Option<Party>,
    #[serde(default)]
    pub items: Option<Vec<LineItemPayload>>,
    #[serde(default)]
    pub tax_base_cents: Option<u64>,
    #[serde(default)]
    pub tax_cents: Option<u64>,
    #[serde(default)]
    pub freight_cents: Option<u64>,
    #[serde(default)]
    pub discount_cents: Option<u64>,
    #[serde(default)]
    pub other_cents: Option<u64>,
    #[serde(default)]
    pub declared_total_cents: Option<u64>,
    /// `Some("")` is a real value: it clears the text while remaining
    /// distinguishable from "not mentioned".
    #[serde(default)]
    pub additional_info: Option<String>,
    #[serde(default)]
    pub extras: Option<BTreeMap<String, serde_json::Value>>,
}

impl DraftPatch {
    /// Whether the patch changes anything at all.
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the patch to an immutable prior payload, returning the
    /// merged result. The prior value is never mutated; failed validation
    /// of the merge result leaves the caller holding the original.
    pub fn apply(&self, prior: &InvoicePayload) -> InvoicePayload {
        InvoicePayload {
            kind: self.kind.unwrap_or(prior.kind),
            series: self.series.unwrap_or(prior.series),
            number: self.number.unwrap_or(prior.number),
            issued_at: self.issued_at.unwrap_or(prior.issued_at),
            issuer: self.issuer.clone().unwrap_or_else(|| prior.issuer.clone()),
            recipient: self
                .recipient
                .clone()
                .unwrap_or_else(|| prior.recipient.clone()),
            items: self.items.clone().unwrap_or_else(|| prior.items.clone()),
            tax_base_cents: self.tax_base_cents.unwrap_or(prior.tax_base_cents),
            tax_cents: self.tax_cents.unwrap_or(prior.tax_cents),
            freight_cents: self.freight_cents.unwrap_or(prior.freight_cents),
            discount_cents: self.discount_cents.unwrap_or(prior.discount_cents),
            other_cents: self.other_cents.unwrap_or(prior.other_cents),
            declared_total_cents: self.declared_total_cents.or(prior.declared_total_cents),
            additional_info: self
                .additional_info
                .clone()
                .or_else(|| prior.additional_info.clone()),
            extras: self.extras.clone().unwrap_or_else(|| prior.extras.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn prior() -> InvoicePayload {
        InvoicePayload {
            kind: DocumentKind::Goods,
            series: 1,
            number: 101,
            issued_at: Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap(),
            issuer: Party {
                tax_id: "12345678000195".into(),
                name: "ACME LTDA".into(),
                ..Party::default()
            },
            recipient: Party {
                tax_id: "98765432000109".into(),
                name: "Cliente SA".into(),
                ..Party::default()
            },
            items: vec![LineItemPayload {
                code: "P1".into(),
                description: "Widget".into(),
                unit: "UN".into(),
                quantity_milli: 2000,
                unit_value_cents: 1550,
            }],
            tax_base_cents: 0,
            tax_cents: 0,
            freight_cents: 300,
            discount_cents: 0,
            other_cents: 0,
            declared_total_cents: None,
            additional_info: Some("original note".into()),
            extras: BTreeMap::new(),
        }
    }

    #[test]
    fn empty_patch_is_identity() {
        let patch = DraftPatch::default();
        assert!(patch.is_noop());
        assert_eq!(patch.apply(&prior()), prior());
    }

    #[test]
    fn absent_fields_keep_prior_values() {
        let patch = DraftPatch {
            number: Some(102),
            ..DraftPatch::default()
        };
        let merged = patch.apply(&prior());
        assert_eq!(merged.number, 102);
        assert_eq!(merged.series, 1);
        assert_eq!(merged.freight_cents, 300);
        assert_eq!(merged.additional_info.as_deref(), Some("original note"));
    }

    #[test]
    fn explicit_zero_replaces_prior_value() {
        // The classic truthiness trap: 0 is a real value, not "absent".
        let patch = DraftPatch {
            freight_cents: Some(0),
            ..DraftPatch::default()
        };
        let merged = patch.apply(&prior());
        assert_eq!(merged.freight_cents, 0);
    }

    #[test]
    fn explicit_empty_string_replaces_prior_text() {
        let patch = DraftPatch {
            additional_info: Some(String::new()),
            ..DraftPatch::default()
        };
        let merged = patch.apply(&prior());
        assert_eq!(merged.additional_info.as_deref(), Some(""));
    }

    #[test]
    fn items_replace_wholesale() {
        let patch = DraftPatch {
            items: Some(vec![LineItemPayload {
                code: "P9".into(),
                description: "Replacement".into(),
                unit: "CX".into(),
                quantity_milli: 1000,
                unit_value_cents: 99,
            }]),
            ..DraftPatch::default()
        };
        let merged = patch.apply(&prior());
        assert_eq!(merged.items.len(), 1);
        assert_eq!(merged.items[0].code, "P9");
    }

    #[test]
    fn prior_snapshot_is_untouched() {
        let snapshot = prior();
        let patch = DraftPatch {
            number: Some(999),
            additional_info: Some(String::new()),
            ..DraftPatch::default()
        };
        let _ = patch.apply(&snapshot);
        assert_eq!(snapshot.number, 101);
        assert_eq!(snapshot.additional_info.as_deref(), Some("original note"));
    }

    #[test]
    fn patch_json_omits_absent_fields() {
        let json = r#"{ "number": 500, "freight_cents": 0 }"#;
        let patch: DraftPatch = serde_json::from_str(json).unwrap();
        assert_eq!(patch.number, Some(500));
        assert_eq!(patch.freight_cents, Some(0));
        assert_eq!(patch.series, None);
        let merged = patch.apply(&prior());
        assert_eq!(merged.number, 500);
        assert_eq!(merged.freight_cents, 0);
        assert_eq!(merged.series, 1);
    }
}
