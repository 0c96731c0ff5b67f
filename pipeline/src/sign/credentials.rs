//! Emitter credentials: the signing keypair and its certificate.
//!
//! A certificate here is an authority-issued attestation binding an issuer
//! tax id to an Ed25519 public key for a validity window. It is serialized
//! as canonical JSON and embedded (hex-encoded) in every signed document,
//! so receivers can verify signatures without any out-of-band key exchange.

use std::fmt;
use std::fs;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::{EmitterConfig, SEAL_NONCE_LENGTH, SIGNING_KEY_LENGTH};
use crate::sign::SigningError;

// ---------------------------------------------------------------------------
// Keypair
// ---------------------------------------------------------------------------

/// The emitter's Ed25519 signing keypair.
///
/// Deliberately does not implement `Serialize`: key material leaves this
/// type only through [`seal_key_file`], never through serde.
pub struct EmitterKeypair {
    signing_key: SigningKey,
}

impl EmitterKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic construction from a 32-byte seed. A weak seed makes a
    /// weak key, so feed this from a CSPRNG or an unsealed key file only.
    pub fn from_seed(seed: &[u8; SIGNING_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Hex-encoded public key, 64 characters. Safe to log and embed.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message. Ed25519 is deterministic, so the same key and
    /// message always produce the same signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    fn seed_bytes(&self) -> [u8; SIGNING_KEY_LENGTH] {
        self.signing_key.to_bytes()
    }
}

impl Clone for EmitterKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for EmitterKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secret material never reaches debug output.
        write!(f, "EmitterKeypair(pub={})", self.public_key_hex())
    }
}

// ---------------------------------------------------------------------------
// Certificate
// ---------------------------------------------------------------------------

/// An authority-issued binding of an issuer tax id to a public key.
///
/// The issuer signs the certificate body over a canonical byte form, so
/// the structure is tamper-evident without depending on JSON field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub serial: String,
    pub subject_tax_id: String,
    pub public_key_hex: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub issuer: String,
    pub issuer_public_key_hex: String,
    pub signature_hex: String,
}

impl Certificate {
    /// Issue a certificate for `subject_public_key`, signed by `authority`.
    pub fn issue(
        subject_tax_id: &str,
        subject_public_key_hex: &str,
        authority_name: &str,
        authority: &EmitterKeypair,
        valid_days: i64,
    ) -> Self {
        let now = Utc::now();
        let mut certificate = Self {
            serial: Uuid::new_v4().to_string(),
            subject_tax_id: subject_tax_id.to_string(),
            public_key_hex: subject_public_key_hex.to_string(),
            not_before: now,
            not_after: now + Duration::days(valid_days),
            issuer: authority_name.to_string(),
            issuer_public_key_hex: authority.public_key_hex(),
            signature_hex: String::new(),
        };
        let signature = authority.sign(&certificate.canonical_bytes());
        certificate.signature_hex = hex::encode(signature.to_bytes());
        certificate
    }

    /// Canonical byte form of the certificate body, excluding the issuer
    /// signature. Field order is fixed; fields are null-separated.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for field in [
            self.serial.as_str(),
            self.subject_tax_id.as_str(),
            self.public_key_hex.as_str(),
            &self.not_before.to_rfc3339(),
            &self.not_after.to_rfc3339(),
            self.issuer.as_str(),
            self.issuer_public_key_hex.as_str(),
        ] {
            bytes.extend_from_slice(field.as_bytes());
            bytes.push(0);
        }
        bytes
    }

    /// Full validation at a given instant: issuer signature and validity
    /// window. Reasons are reported because a rejected certificate is an
    /// operator problem, not an attacker probe.
    pub fn verify_at(&self, now: DateTime<Utc>) -> Result<(), SigningError> {
        if now < self.not_before {
            return Err(SigningError::CertificateInvalid {
                reason: format!("not valid before {}", self.not_before),
            });
        }
        if now > self.not_after {
            return Err(SigningError::CertificateInvalid {
                reason: format!("expired at {}", self.not_after),
            });
        }
        let issuer_key = decode_verifying_key(&self.issuer_public_key_hex)
            .ok_or_else(|| SigningError::CertificateInvalid {
                reason: "issuer public key is not a valid Ed25519 point".into(),
            })?;
        let signature = decode_signature(&self.signature_hex).ok_or_else(|| {
            SigningError::CertificateInvalid {
                reason: "issuer signature is malformed".into(),
            }
        })?;
        issuer_key
            .verify(&self.canonical_bytes(), &signature)
            .map_err(|_| SigningError::CertificateInvalid {
                reason: "issuer signature does not match certificate body".into(),
            })
    }

    pub fn verify(&self) -> Result<(), SigningError> {
        self.verify_at(Utc::now())
    }

    /// Whether this certificate attests the given keypair's public key.
    pub fn matches_key(&self, keypair: &EmitterKeypair) -> bool {
        self.public_key_hex == keypair.public_key_hex()
    }

    /// The subject's verifying key, if the stored hex is a valid point.
    pub fn subject_key(&self) -> Option<VerifyingKey> {
        decode_verifying_key(&self.public_key_hex)
    }

    /// Hex-encoded JSON of the full certificate, as embedded in signed
    /// documents.
    pub fn encode_hex(&self) -> Result<String, SigningError> {
        Ok(hex::encode(serde_json::to_vec(self)?))
    }

    /// Reverse of [`encode_hex`](Self::encode_hex).
    pub fn decode_hex(encoded: &str) -> Result<Self, SigningError> {
        let bytes = hex::decode(encoded).map_err(|_| SigningError::CertificateInvalid {
            reason: "embedded certificate is not valid hex".into(),
        })?;
        serde_json::from_slice(&bytes).map_err(SigningError::Serialization)
    }

    pub fn save(&self, path: &Path) -> Result<(), SigningError> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, SigningError> {
        let raw = fs::read(path)?;
        serde_json::from_slice(&raw).map_err(SigningError::Serialization)
    }
}

fn decode_verifying_key(hex_str: &str) -> Option<VerifyingKey> {
    let bytes = hex::decode(hex_str).ok()?;
    let arr: [u8; 32] = bytes.as_slice().try_into().ok()?;
    VerifyingKey::from_bytes(&arr).ok()
}

fn decode_signature(hex_str: &str) -> Option<Signature> {
    let bytes = hex::decode(hex_str).ok()?;
    let arr: [u8; 64] = bytes.as_slice().try_into().ok()?;
    Some(Signature::from_bytes(&arr))
}

// ---------------------------------------------------------------------------
// Sealed key files
// ---------------------------------------------------------------------------

/// Seal a keypair to disk: AES-256-GCM under a passphrase-derived key,
/// written as hex of `nonce || ciphertext`, file mode 0600 on unix.
pub fn seal_key_file(
    path: &Path,
    keypair: &EmitterKeypair,
    passphrase: &str,
) -> Result<(), SigningError> {
    let key = passphrase_key(passphrase);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| SigningError::KeyUnlockFailed)?;

    let mut nonce_bytes = [0u8; SEAL_NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, keypair.seed_bytes().as_slice())
        .map_err(|_| SigningError::KeyUnlockFailed)?;

    let mut sealed = Vec::with_capacity(SEAL_NONCE_LENGTH + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    fs::write(path, hex::encode(sealed))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

/// Unseal a key file written by [`seal_key_file`]. A wrong passphrase and
/// a flipped ciphertext bit fail identically.
pub fn unseal_key_file(path: &Path, passphrase: &str) -> Result<EmitterKeypair, SigningError> {
    let raw = fs::read_to_string(path)?;
    let sealed = hex::decode(raw.trim()).map_err(|_| SigningError::KeyFileCorrupt {
        reason: "not valid hex".into(),
    })?;
    if sealed.len() <= SEAL_NONCE_LENGTH {
        return Err(SigningError::KeyFileCorrupt {
            reason: "shorter than a nonce".into(),
        });
    }

    let key = passphrase_key(passphrase);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| SigningError::KeyUnlockFailed)?;
    let (nonce_bytes, ciphertext) = sealed.split_at(SEAL_NONCE_LENGTH);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| SigningError::KeyUnlockFailed)?;
    let seed: [u8; SIGNING_KEY_LENGTH] =
        plaintext
            .as_slice()
            .try_into()
            .map_err(|_| SigningError::KeyFileCorrupt {
                reason: "unsealed payload is not a 32-byte seed".into(),
            })?;

    Ok(EmitterKeypair::from_seed(&seed))
}

fn passphrase_key(passphrase: &str) -> [u8; 32] {
    Sha256::digest(passphrase.as_bytes()).into()
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// An unlocked keypair paired with its certificate. Built once at startup
/// and shared read-only across the pipeline.
#[derive(Debug, Clone)]
pub struct SigningCredentials {
    pub keypair: EmitterKeypair,
    pub certificate: Certificate,
}

impl SigningCredentials {
    /// Load and cross-check credentials from the paths in `config`.
    pub fn load(config: &EmitterConfig) -> Result<Self, SigningError> {
        let keypair = unseal_key_file(&config.key_path, &config.passphrase)?;
        let certificate = Certificate::load(&config.certificate_path)?;
        certificate.verify()?;
        if !certificate.matches_key(&keypair) {
            return Err(SigningError::CertificateInvalid {
                reason: "certificate public key does not match the signing key".into(),
            });
        }
        if certificate.subject_tax_id != config.issuer_tax_id {
            return Err(SigningError::CertificateInvalid {
                reason: format!(
                    "certificate subject {} does not match configured issuer {}",
                    certificate.subject_tax_id, config.issuer_tax_id
                ),
            });
        }
        Ok(Self {
            keypair,
            certificate,
        })
    }

    /// Generate a fresh keypair with a certificate signed by a throwaway
    /// authority. The authority key is discarded; the certificate still
    /// verifies through its embedded issuer key. Suitable for homologation
    /// runs, not for production issuance.
    pub fn provision(issuer_tax_id: &str, valid_days: i64) -> Self {
        let keypair = EmitterKeypair::generate();
        let authority = EmitterKeypair::generate();
        let certificate = Certificate::issue(
            issuer_tax_id,
            &keypair.public_key_hex(),
            "homologation-authority",
            &authority,
            valid_days,
        );
        Self {
            keypair,
            certificate,
        }
    }

    /// Persist the keypair (sealed) and certificate to the given paths.
    pub fn store(
        &self,
        key_path: &Path,
        certificate_path: &Path,
        passphrase: &str,
    ) -> Result<(), SigningError> {
        seal_key_file(key_path, &self.keypair, passphrase)?;
        self.certificate.save(certificate_path)?;
        Ok(())
    }
}
