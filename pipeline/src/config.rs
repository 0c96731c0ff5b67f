//! # Pipeline Configuration & Constants
//!
//! Every magic number in lavra lives here. The schema version, the access
//! key layout widths, the polling caps: all of it. If you are hardcoding a
//! constant somewhere else, you are doing it wrong and you owe the team
//! coffee.
//!
//! The authority publishes its numbers in normative documents; ours are
//! operational knobs. The two kinds are kept in separate sections so nobody
//! "tunes" a legally defined field width.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Schema & Document Layout
// ---------------------------------------------------------------------------

/// Schema version stamped on every emitted document and envelope.
/// The authority rejects versions it has retired, so this moves in lockstep
/// with their published layout, not with our crate version.
pub const SCHEMA_VERSION: &str = "4.00";

/// Total length of an access key in decimal digits.
pub const ACCESS_KEY_LENGTH: usize = 44;

/// Model code for the goods invoice variant.
pub const MODEL_GOODS: &str = "55";

/// Model code for the service invoice variant.
pub const MODEL_SERVICE: &str = "56";

/// Emission form digit in the access key. `1` is normal online emission.
/// Contingency forms exist in the layout but this pipeline never uses them.
pub const EMISSION_FORM_NORMAL: char = '1';

/// XML namespace for goods invoice documents and envelopes.
pub const NAMESPACE_GOODS: &str = "http://www.portalfiscal.inf.br/nfe";

/// XML namespace for service invoice documents and envelopes.
pub const NAMESPACE_SERVICE: &str = "http://www.portalfiscal.inf.br/nfse";

/// Maximum number of line items one document may carry. The authority's
/// layout caps this; drafts above it fail validation locally instead of
/// travelling to the authority just to be bounced.
pub const MAX_LINE_ITEMS: usize = 990;

/// Maximum length of a line item description, in characters.
pub const MAX_DESCRIPTION_LENGTH: usize = 120;

/// Maximum length of the free-text additional information block.
pub const MAX_ADDITIONAL_INFO_LENGTH: usize = 2000;

/// Maximum number of signed documents one submission envelope may carry.
pub const MAX_BATCH_SIZE: usize = 50;

// ---------------------------------------------------------------------------
// Authority Status Codes
// ---------------------------------------------------------------------------
//
// The authority answers with a numeric status field. Classification happens
// on this field and nowhere else; response prose is surfaced to humans
// verbatim but never inspected by code.

/// Document authorized for use. Terminal success.
pub const STATUS_AUTHORIZED: &str = "100";

/// Batch received and queued for asynchronous processing.
pub const STATUS_QUEUED: &str = "103";

/// Batch processed; individual results available.
pub const STATUS_BATCH_PROCESSED: &str = "104";

/// Batch still being processed. Poll again.
pub const STATUS_PROCESSING: &str = "105";

/// Use of the document denied by the authority. Terminal failure.
pub const STATUS_DENIED: &str = "110";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Digest algorithm recorded in every signature block.
pub const DIGEST_ALGORITHM: &str = "SHA-256";

/// Signature algorithm recorded in every signature block.
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

/// Ed25519 secret seed length in bytes.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Ed25519 public key length in bytes.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// AES-256-GCM key length for sealed key files.
pub const SEAL_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length for sealed key files. 96 bits, per the mode's
/// specification. Twelve bytes. Not sixteen. Not eight.
pub const SEAL_NONCE_LENGTH: usize = 12;

// ---------------------------------------------------------------------------
// Transport Timing
// ---------------------------------------------------------------------------

/// End-to-end timeout for one authority HTTP request.
pub const TRANSPORT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP connect timeout for authority endpoints.
pub const TRANSPORT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum retry attempts for network-layer failures. Synchronous
/// rejections are never retried regardless of this value.
pub const TRANSPORT_MAX_RETRIES: u32 = 4;

/// Base delay for transport retry backoff. Doubles per attempt.
pub const TRANSPORT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Ceiling for transport retry backoff.
pub const TRANSPORT_BACKOFF_MAX: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Protocol Polling
// ---------------------------------------------------------------------------

/// Base interval between status queries while a document sits in the
/// authority's queue.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Random jitter added to every poll interval, in milliseconds. Keeps a
/// fleet of emitters from hammering the authority in phase.
pub const POLL_JITTER_MS: u64 = 500;

/// Maximum number of status queries before giving up on a pending document.
pub const POLL_MAX_ATTEMPTS: u32 = 15;

/// Hard ceiling on total polling time. Past this the reconciler returns a
/// recoverable timeout; the access key stays valid for a later attempt.
pub const POLL_MAX_ELAPSED: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Which of the authority's two worlds a document is emitted into.
///
/// Homologation documents carry no legal weight and the authority stamps
/// them accordingly. Production documents are the real thing. The flag is
/// baked into the document itself, so a draft built for one environment
/// cannot be quietly replayed into the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// The authority's staging world. Free practice, zero legal effect.
    Homologation,
    /// The real fiscal ledger. Mistakes here involve accountants.
    Production,
}

impl Environment {
    /// The single-digit wire code the authority's schema uses.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::Production => "1",
            Self::Homologation => "2",
        }
    }

    /// Decodes the wire digit. Returns `None` for anything unrecognized.
    pub fn from_wire_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(Self::Production),
            "2" => Some(Self::Homologation),
            _ => None,
        }
    }

    /// Default submission endpoint for this environment.
    pub fn default_submit_url(&self) -> &'static str {
        match self {
            Self::Homologation => "https://homolog.authority.fazenda.gov.br/ws/autorizacao",
            Self::Production => "https://authority.fazenda.gov.br/ws/autorizacao",
        }
    }

    /// Default status-query endpoint for this environment.
    pub fn default_query_url(&self) -> &'static str {
        match self {
            Self::Homologation => "https://homolog.authority.fazenda.gov.br/ws/consulta",
            Self::Production => "https://authority.fazenda.gov.br/ws/consulta",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Homologation => write!(f, "homologation"),
            Self::Production => write!(f, "production"),
        }
    }
}

// ---------------------------------------------------------------------------
// EmitterConfig
// ---------------------------------------------------------------------------

/// Everything the pipeline needs to know about its operator, built once at
/// startup and passed explicitly into every stage that needs it.
///
/// There is deliberately no global instance and no lazy loader. A second
/// emitter in the same process gets a second config, and a test gets a
/// throwaway one.
#[derive(Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Target environment. Also stamped into every document.
    pub environment: Environment,
    /// Two-digit region code of the issuing establishment. First field of
    /// the access key.
    pub region_code: u8,
    /// Issuer tax id, 14 digits. Third field of the access key.
    pub issuer_tax_id: String,
    /// Path to the sealed private key file.
    pub key_path: PathBuf,
    /// Path to the certificate file.
    pub certificate_path: PathBuf,
    /// Passphrase unsealing the key file. Supplied out-of-band; never
    /// logged, never serialized back out.
    #[serde(skip_serializing, default)]
    pub passphrase: String,
    /// Optional PEM bundle for transport-layer client authentication.
    /// When absent the HTTP client connects without a client identity.
    pub tls_identity_path: Option<PathBuf>,
    /// Override for the submission endpoint. Defaults per environment.
    pub submit_url: Option<String>,
    /// Override for the status-query endpoint. Defaults per environment.
    pub query_url: Option<String>,
    /// Retry and timeout policy for authority calls.
    pub transport: TransportPolicy,
    /// Poll loop bounds for the reconciler.
    pub polling: PollingPolicy,
}

impl EmitterConfig {
    /// A config with all knobs at their defaults for the given identity.
    pub fn new(
        environment: Environment,
        region_code: u8,
        issuer_tax_id: impl Into<String>,
        key_path: impl Into<PathBuf>,
        certificate_path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            environment,
            region_code,
            issuer_tax_id: issuer_tax_id.into(),
            key_path: key_path.into(),
            certificate_path: certificate_path.into(),
            passphrase: passphrase.into(),
            tls_identity_path: None,
            submit_url: None,
            query_url: None,
            transport: TransportPolicy::default(),
            polling: PollingPolicy::default(),
        }
    }

    /// Effective submission endpoint: the override, or the environment default.
    pub fn submit_endpoint(&self) -> String {
        self.submit_url
            .clone()
            .unwrap_or_else(|| self.environment.default_submit_url().to_string())
    }

    /// Effective status-query endpoint: the override, or the environment default.
    pub fn query_endpoint(&self) -> String {
        self.query_url
            .clone()
            .unwrap_or_else(|| self.environment.default_query_url().to_string())
    }
}

// The passphrase must never reach logs, so Debug is written by hand.
impl fmt::Debug for EmitterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmitterConfig")
            .field("environment", &self.environment)
            .field("region_code", &self.region_code)
            .field("issuer_tax_id", &self.issuer_tax_id)
            .field("key_path", &self.key_path)
            .field("certificate_path", &self.certificate_path)
            .field("passphrase", &"<redacted>")
            .field("tls_identity_path", &self.tls_identity_path)
            .field("submit_url", &self.submit_url)
            .field("query_url", &self.query_url)
            .field("transport", &self.transport)
            .field("polling", &self.polling)
            .finish()
    }
}

/// Retry and timeout policy for one authority HTTP call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportPolicy {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self {
            request_timeout: TRANSPORT_REQUEST_TIMEOUT,
            connect_timeout: TRANSPORT_CONNECT_TIMEOUT,
            max_retries: TRANSPORT_MAX_RETRIES,
            backoff_base: TRANSPORT_BACKOFF_BASE,
            backoff_max: TRANSPORT_BACKOFF_MAX,
        }
    }
}

/// Bounds for the reconciler's poll loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingPolicy {
    pub interval: Duration,
    pub jitter_ms: u64,
    pub max_attempts: u32,
    pub max_elapsed: Duration,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            jitter_ms: POLL_JITTER_MS,
            max_attempts: POLL_MAX_ATTEMPTS,
            max_elapsed: POLL_MAX_ELAPSED,
        }
    }
}
