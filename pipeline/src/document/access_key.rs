//! The 44-digit access key: the document's identity from draft to archive.
//!
//! The key is a pure function of draft fields. Computing it twice from the
//! same draft yields the same digits, which is what lets the reconciler
//! correlate an authority protocol with the locally held signed document
//! without trusting anything but arithmetic.
//!
//! Layout, left to right:
//!
//! ```text
//! region(2) period(4) issuer(14) model(2) series(3) number(9) form(1) code(8) check(1)
//! ```
//!
//! `period` is the emission year and month as `YYMM`. `code` is a numeric
//! code derived from the numbering fields by hashing, so it is stable
//! without being guessable from the visible fields alone. `check` is the
//! classic modulus-11 check digit over the first 43 digits.

use crate::config;
use crate::document::types::{DocumentKind, Numbering};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Errors for access key computation and parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessKeyError {
    #[error("access key must be {expected} digits, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("access key contains a non-digit character at position {position}")]
    NonDigit { position: usize },

    #[error("check digit mismatch: expected {expected}, got {got}")]
    CheckDigitMismatch { expected: u8, got: u8 },

    #[error("issuer tax id must be at most 14 digits, got {got}")]
    IssuerTooLong { got: usize },

    #[error("issuer tax id contains non-digit characters")]
    IssuerNotNumeric,
}

// ---------------------------------------------------------------------------
// AccessKey
// ---------------------------------------------------------------------------

/// A validated 44-digit access key.
///
/// Construction goes through [`AccessKey::compute`] or [`AccessKey::parse`];
/// both guarantee the length, digit, and check-digit invariants, so any
/// value of this type is structurally valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessKey(String);

impl AccessKey {
    /// Computes the access key for a draft's identifying fields.
    ///
    /// Pure: no clock, no randomness. The same inputs always produce the
    /// same key.
    pub fn compute(
        region_code: u8,
        issuer_tax_id: &str,
        kind: DocumentKind,
        numbering: Numbering,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, AccessKeyError> {
        if issuer_tax_id.len() > 14 {
            return Err(AccessKeyError::IssuerTooLong {
                got: issuer_tax_id.len(),
            });
        }
        if !issuer_tax_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(AccessKeyError::IssuerNotNumeric);
        }

        let period = format!("{:02}{:02}", issued_at.year() % 100, issued_at.month());
        let numeric_code = numeric_code(region_code, issuer_tax_id, kind, numbering, &period);

        let mut digits = format!(
            "{:02}{}{:0>14}{}{:03}{:09}{}{:08}",
            region_code,
            period,
            issuer_tax_id,
            kind.model_code(),
            numbering.series,
            numbering.number,
            config::EMISSION_FORM_NORMAL,
            numeric_code,
        );
        debug_assert_eq!(digits.len(), config::ACCESS_KEY_LENGTH - 1);

        let check = check_digit(&digits);
        digits.push(char::from(b'0' + check));
        Ok(Self(digits))
    }

    /// Validates and wraps an externally supplied key, e.g. one quoted in
    /// an authority protocol.
    pub fn parse(input: &str) -> Result<Self, AccessKeyError> {
        let trimmed = input.trim();
        if trimmed.len() != config::ACCESS_KEY_LENGTH {
            return Err(AccessKeyError::InvalidLength {
                expected: config::ACCESS_KEY_LENGTH,
                got: trimmed.len(),
            });
        }
        if let Some(position) = trimmed.chars().position(|c| !c.is_ascii_digit()) {
            return Err(AccessKeyError::NonDigit { position });
        }

        let body = &trimmed[..config::ACCESS_KEY_LENGTH - 1];
        let claimed = trimmed.as_bytes()[config::ACCESS_KEY_LENGTH - 1] - b'0';
        let expected = check_digit(body);
        if claimed != expected {
            return Err(AccessKeyError::CheckDigitMismatch {
                expected,
                got: claimed,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The raw 44 digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key grouped in blocks of four for human display.
    pub fn formatted(&self) -> String {
        self.0
            .as_bytes()
            .chunks(4)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The model-code field, decoded back into a [`DocumentKind`] when it
    /// names one this crate knows.
    pub fn kind(&self) -> Option<DocumentKind> {
        DocumentKind::from_model_code(&self.0[20..22])
    }

    /// The embedded series field.
    pub fn series(&self) -> u16 {
        self.0[22..25].parse().unwrap_or_default()
    }

    /// The embedded sequential number field.
    pub fn number(&self) -> u32 {
        self.0[25..34].parse().unwrap_or_default()
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Field derivation
// ---------------------------------------------------------------------------

/// Derives the eight-digit numeric code field from the identifying fields.
///
/// The fields are hashed with explicit separators so `series=1, number=23`
/// can never collide with `series=12, number=3`.
fn numeric_code(
    region_code: u8,
    issuer_tax_id: &str,
    kind: DocumentKind,
    numbering: Numbering,
    period: &str,
) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update([region_code]);
    hasher.update([0u8]);
    hasher.update(issuer_tax_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(kind.model_code().as_bytes());
    hasher.update([0u8]);
    hasher.update(numbering.series.to_le_bytes());
    hasher.update(numbering.number.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(period.as_bytes());
    let digest = hasher.finalize();
    let word = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    word % 100_000_000
}

/// Modulus-11 check digit over a digit string.
///
/// Weights cycle 2 through 9 starting from the rightmost digit. A remainder
/// of 0 or 1 maps to check digit 0.
pub fn check_digit(digits: &str) -> u8 {
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let weight = 2 + (i as u32 % 8);
            weight * u32::from(b - b'0')
        })
        .sum();
    let dv = 11 - (sum % 11);
    if dv >= 10 {
        0
    } else {
        dv as u8
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
