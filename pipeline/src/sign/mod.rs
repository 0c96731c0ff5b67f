//! # Canonicalization and Signing
//!
//! Turns a validated draft into a signed, transmission-ready artifact.
//!
//! The contract is narrow on purpose: one canonical byte form (produced by
//! [`crate::xml::writer::canonical_inf_node`]), one digest over those bytes,
//! one Ed25519 signature over the digest, and a signature block embedded in
//! the document next to the element it covers. Anyone holding the signed
//! document can recompute the digest and verify the signature using nothing
//! but the embedded certificate.
//!
//! ## Key custody
//!
//! Signing keys live sealed on disk (AES-256-GCM under a passphrase-derived
//! key) and are unlocked once at startup into a [`SigningCredentials`].
//! Key bytes are never logged and never serialized implicitly.

pub mod credentials;
pub mod signer;

use thiserror::Error;

pub use credentials::{Certificate, EmitterKeypair, SigningCredentials};
pub use signer::{sign_draft, verify_signed_document, SignatureBlock, SignedDocument};

/// Errors from credential handling and signing.
///
/// Crypto failures stay vague: the difference between "wrong passphrase"
/// and "corrupted ciphertext" is not something we report.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The sealed key file could not be decrypted with the given passphrase.
    #[error("could not unlock signing key: wrong passphrase or corrupted key file")]
    KeyUnlockFailed,

    /// The key file is not in the expected sealed format.
    #[error("key file is corrupt: {reason}")]
    KeyFileCorrupt { reason: String },

    /// The certificate failed validation.
    #[error("certificate rejected: {reason}")]
    CertificateInvalid { reason: String },

    /// The draft is not in a signable state.
    #[error("document structure not signable: {reason}")]
    StructureInvalid { reason: String },

    /// The signed artifact does not verify against its own signature block.
    #[error("signature verification failed: {reason}")]
    VerificationFailed { reason: String },

    #[error("certificate serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("canonical serialization failed: {0}")]
    Xml(#[from] crate::xml::XmlError),

    #[error("credential file i/o failed: {0}")]
    Io(#[from] std::io::Error),
}
