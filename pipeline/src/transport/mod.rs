//! # Authority Transport
//!
//! Carries signed documents to the fiscal authority and brings protocol
//! responses back. Three outcomes, kept strictly apart:
//!
//! 1. **Transported, processed** — the authority answered with a receipt
//!    or a protocol. Business meaning lives in the status code.
//! 2. **Transported, refused** — the authority answered with a rejection.
//!    Retrying the same bytes will produce the same refusal, so we don't.
//! 3. **Not transported** — timeout, connection failure, server error.
//!    The document may or may not have arrived; these retry with bounded
//!    exponential backoff.
//!
//! Classification happens on status codes and transport errors only.
//! Response message text is for humans and never drives control flow.

pub mod client;
pub mod envelope;

use thiserror::Error;

use crate::xml::XmlError;

pub use client::{AuthorityClient, AuthorityEndpoint, HttpAuthorityEndpoint};
pub use envelope::{
    AuthorityProtocol, ProtocolStatus, QueryOutcome, SubmissionAck, SubmissionOutcome,
};

/// Transport-layer failures. [`TransportError::is_retryable`] is the single
/// source of truth for what the retry loop may attempt again.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The authority could not be reached: connect failure or timeout.
    #[error("authority unreachable: {message}")]
    Unreachable { message: String },

    /// The authority answered with a server-side HTTP error.
    #[error("authority returned server error {status}")]
    ServerError { status: u16 },

    /// The transport itself refused the request (HTTP 4xx, TLS rejection).
    /// Not a fiscal rejection; those arrive as well-formed responses.
    #[error("request refused at transport level: {message}")]
    Refused { message: String },

    /// Every allowed attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// The caller's deadline expired before an attempt could complete.
    #[error("deadline exceeded while talking to the authority")]
    DeadlineExceeded,

    /// The mutual-TLS identity could not be loaded.
    #[error("transport identity unusable: {0}")]
    Identity(String),

    #[error("http client construction failed: {0}")]
    ClientBuild(String),

    #[error("xml codec failure: {0}")]
    Xml(#[from] XmlError),

    /// The authority answered, but the body is not a response we know.
    #[error("authority response malformed: {reason}")]
    MalformedResponse { reason: String },

    #[error("invalid submission batch: {reason}")]
    InvalidBatch { reason: String },
}

impl TransportError {
    /// Whether the retry loop may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable { .. } | TransportError::ServerError { .. }
        )
    }
}
