//! In-process numbering uniqueness.
//!
//! The authority treats {issuer, kind, series, number} as the identity of a
//! document; emitting the same key twice is a protocol violation that only
//! surfaces after signing and transmission. The registry catches the
//! duplicate locally, before a signature ever exists.
//!
//! Persistence of issued numbers belongs to the surrounding system of
//! record. This registry guards one process, which is exactly the window in
//! which two concurrent emissions could race each other to the same number.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::document::builder::ValidationError;
use crate::document::types::DocumentKind;

/// The identity a numbering claim is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NumberingKey {
    pub issuer_tax_id: String,
    pub kind: DocumentKind,
    pub series: u16,
    pub number: u32,
}

impl std::fmt::Display for NumberingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} series {} number {}",
            self.issuer_tax_id, self.kind, self.series, self.number
        )
    }
}

/// Concurrent claim table for numbering keys.
///
/// A claim is taken before signing and released only if the emission fails
/// before reaching the authority. Once a document has been submitted the
/// claim stays for the life of the process, success or denial: the number
/// is burned either way.
#[derive(Debug, Default)]
pub struct NumberingRegistry {
    claims: DashMap<NumberingKey, DateTime<Utc>>,
}

impl NumberingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a numbering key. Fails if any earlier emission in this
    /// process already holds it.
    pub fn claim(&self, key: NumberingKey) -> Result<(), ValidationError> {
        match self.claims.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Err(ValidationError::single(
                "numbering",
                format!("{} already issued", entry.key()),
            )),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Utc::now());
                Ok(())
            }
        }
    }

    /// Releases a claim, making the number usable again. Only correct when
    /// the emission failed before submission.
    pub fn release(&self, key: &NumberingKey) {
        self.claims.remove(key);
    }

    /// Whether the key is currently claimed.
    pub fn is_claimed(&self, key: &NumberingKey) -> bool {
        self.claims.contains_key(key)
    }

    /// Number of live claims.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}
