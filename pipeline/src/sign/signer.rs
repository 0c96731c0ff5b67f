//! Digesting and signing of canonical documents.
//!
//! The signature never covers the serialized document as transmitted; it
//! covers the canonical bytes of the identified element. Whitespace added
//! in transit, reordered siblings outside the element, or a protocol node
//! appended later all leave the signature intact.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::document::types::FiscalDocumentDraft;
use crate::document::AccessKey;
use crate::sign::credentials::{Certificate, SigningCredentials};
use crate::sign::SigningError;
use crate::xml::writer;

/// The signature block embedded in a signed document, mirroring the
/// `Signature` element field for field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlock {
    pub digest_algorithm: String,
    pub signature_algorithm: String,
    /// Hex SHA-256 of the canonical identified element.
    pub digest_hex: String,
    /// Hex Ed25519 signature over the digest bytes.
    pub signature_hex: String,
    /// Reference to the signed element, `#` plus its Id attribute.
    pub reference: String,
    /// Hex-encoded certificate JSON, embedded for offline verification.
    pub certificate_hex: String,
}

/// A draft that has been canonicalized and signed. The `xml` field is the
/// transmission artifact; downstream stages must carry it byte for byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedDocument {
    pub draft: FiscalDocumentDraft,
    pub signature: SignatureBlock,
    pub xml: String,
}

impl SignedDocument {
    pub fn access_key(&self) -> &AccessKey {
        &self.draft.access_key
    }

    pub fn document_id(&self) -> String {
        self.draft.document_id()
    }
}

/// Canonicalize, digest, and sign a validated draft.
///
/// Rejects drafts whose structure does not hold up (a malformed access
/// key, no line items) and credentials whose certificate does not cover
/// the draft's issuer. On success the returned artifact carries the
/// signature block both as data and embedded in the serialized XML.
pub fn sign_draft(
    draft: FiscalDocumentDraft,
    credentials: &SigningCredentials,
) -> Result<SignedDocument, SigningError> {
    AccessKey::parse(draft.access_key.as_str()).map_err(|e| SigningError::StructureInvalid {
        reason: format!("access key: {e}"),
    })?;
    if draft.items.is_empty() {
        return Err(SigningError::StructureInvalid {
            reason: "document has no line items".into(),
        });
    }

    let certificate = &credentials.certificate;
    certificate.verify()?;
    if !certificate.matches_key(&credentials.keypair) {
        return Err(SigningError::CertificateInvalid {
            reason: "certificate public key does not match the signing key".into(),
        });
    }
    if certificate.subject_tax_id != draft.issuer.tax_id {
        return Err(SigningError::CertificateInvalid {
            reason: format!(
                "certificate subject {} does not cover issuer {}",
                certificate.subject_tax_id, draft.issuer.tax_id
            ),
        });
    }

    let canonical = writer::canonical_inf_node(&draft)?;
    let digest = Sha256::digest(&canonical);
    let signature = credentials.keypair.sign(&digest);

    let block = SignatureBlock {
        digest_algorithm: crate::config::DIGEST_ALGORITHM.to_string(),
        signature_algorithm: crate::config::SIGNATURE_ALGORITHM.to_string(),
        digest_hex: hex::encode(digest),
        signature_hex: hex::encode(signature.to_bytes()),
        reference: format!("#{}", draft.document_id()),
        certificate_hex: certificate.encode_hex()?,
    };

    let xml = writer::signed_document(&draft, &block)?;
    Ok(SignedDocument {
        draft,
        signature: block,
        xml,
    })
}

/// Verify a signed document against nothing but itself.
///
/// Recomputes the canonical digest from the carried draft, decodes the
/// embedded certificate, checks the certificate was valid when the
/// document was issued, and verifies the Ed25519 signature with the
/// certificate's subject key.
pub fn verify_signed_document(document: &SignedDocument) -> Result<(), SigningError> {
    let canonical = writer::canonical_inf_node(&document.draft)?;
    let digest = Sha256::digest(&canonical);
    if hex::encode(digest) != document.signature.digest_hex {
        return Err(SigningError::VerificationFailed {
            reason: "digest does not match the canonical element".into(),
        });
    }

    let expected_reference = format!("#{}", document.draft.document_id());
    if document.signature.reference != expected_reference {
        return Err(SigningError::VerificationFailed {
            reason: format!(
                "signature references {} but the document is {}",
                document.signature.reference, expected_reference
            ),
        });
    }

    let certificate = Certificate::decode_hex(&document.signature.certificate_hex)?;
    certificate.verify_at(document.draft.issued_at)?;
    if certificate.subject_tax_id != document.draft.issuer.tax_id {
        return Err(SigningError::VerificationFailed {
            reason: "embedded certificate does not cover the document issuer".into(),
        });
    }

    let subject_key = certificate
        .subject_key()
        .ok_or_else(|| SigningError::VerificationFailed {
            reason: "embedded certificate carries an invalid public key".into(),
        })?;
    let signature_bytes =
        hex::decode(&document.signature.signature_hex).map_err(|_| {
            SigningError::VerificationFailed {
                reason: "signature is not valid hex".into(),
            }
        })?;
    let signature_array: [u8; 64] =
        signature_bytes
            .as_slice()
            .try_into()
            .map_err(|_| SigningError::VerificationFailed {
                reason: "signature is not 64 bytes".into(),
            })?;
    let signature = ed25519_dalek::Signature::from_bytes(&signature_array);

    subject_key
        .verify_strict(&digest, &signature)
        .map_err(|_| SigningError::VerificationFailed {
            reason: "signature does not verify under the embedded certificate".into(),
        })
}
