//! # Protocol Reconciliation
//!
//! The last custody transfer: pair a signed document with the authority's
//! protocol and produce the final distributable artifact.
//!
//! Two rules are load-bearing here:
//!
//! 1. **Integrity before merge.** The protocol's access key must equal the
//!    document's. On mismatch nothing is merged; the error carries both
//!    keys so operators can see what the authority actually answered.
//! 2. **The signed bytes are untouchable.** The final artifact is built by
//!    concatenation around the signed document exactly as transmitted.
//!    Re-serializing it would risk breaking the signature; we never do.

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::time::{sleep, Instant};

use crate::config::{PollingPolicy, SCHEMA_VERSION};
use crate::document::AccessKey;
use crate::sign::SignedDocument;
use crate::transport::client::{AuthorityClient, AuthorityEndpoint};
use crate::transport::envelope::{AuthorityProtocol, ProtocolStatus, QueryOutcome};
use crate::transport::TransportError;
use crate::xml::XmlError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The authority answered about a different document. Nothing merged.
    #[error("protocol access key {protocol} does not match document access key {document}")]
    IntegrityMismatch { document: String, protocol: String },

    /// Terminal denial. The numbering is consumed; the document is dead.
    #[error("authority denied the document: {code} {message}")]
    Denied { code: String, message: String },

    /// Terminal rejection with a protocol attached.
    #[error("authority rejected the document: {code} {message}")]
    Rejected { code: String, message: String },

    /// A non-terminal protocol reached the merge. Poll further instead.
    #[error("protocol status {code} is not terminal, nothing to merge")]
    NotTerminal { code: String },

    /// The polling window closed with the document still in the queue.
    #[error("document still pending after {attempts} queries over {elapsed_ms}ms")]
    PendingTimeout { attempts: u32, elapsed_ms: u64 },

    /// The authority gave a terminal answer with no protocol to merge.
    #[error("authority query refused: {code} {message}")]
    QueryRefused { code: String, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("final artifact serialization failed: {0}")]
    Xml(#[from] XmlError),
}

/// The distributable artifact: signed document and authority protocol
/// merged under one bundle root.
#[derive(Debug, Clone)]
pub struct FinalDocument {
    pub access_key: AccessKey,
    pub protocol: AuthorityProtocol,
    pub xml: String,
    /// blake3 of `xml`, hex. Stable handle for storage and audit trails.
    pub fingerprint: String,
    pub merged_at: DateTime<Utc>,
}

/// Merge a terminal, integrity-checked protocol into the final artifact.
pub fn merge_protocol(
    signed: &SignedDocument,
    protocol: &AuthorityProtocol,
) -> Result<FinalDocument, ReconcileError> {
    let document_key = signed.access_key().as_str();
    if protocol.access_key != document_key {
        return Err(ReconcileError::IntegrityMismatch {
            document: document_key.to_string(),
            protocol: protocol.access_key.clone(),
        });
    }

    match protocol.status {
        ProtocolStatus::Authorized => {}
        ProtocolStatus::Denied => {
            return Err(ReconcileError::Denied {
                code: protocol.status_code.clone(),
                message: protocol.message.clone(),
            })
        }
        ProtocolStatus::Rejected => {
            return Err(ReconcileError::Rejected {
                code: protocol.status_code.clone(),
                message: protocol.message.clone(),
            })
        }
        ProtocolStatus::Pending => {
            return Err(ReconcileError::NotTerminal {
                code: protocol.status_code.clone(),
            })
        }
    }

    let kind = signed.draft.kind;
    let protocol_xml = protocol.to_xml()?;
    // Concatenation, not re-serialization: the signed portion stays byte
    // for byte as transmitted.
    let xml = format!(
        r#"<{bundle} versao="{SCHEMA_VERSION}" xmlns="{ns}">{signed}{protocol}</{bundle}>"#,
        bundle = kind.bundle_tag(),
        ns = kind.namespace(),
        signed = signed.xml,
        protocol = protocol_xml,
    );
    let fingerprint = blake3::hash(xml.as_bytes()).to_hex().to_string();

    tracing::info!(
        access_key = document_key,
        protocol = protocol.protocol_number.as_deref().unwrap_or("-"),
        status = %protocol.status_code,
        "document reconciled"
    );

    Ok(FinalDocument {
        access_key: signed.access_key().clone(),
        protocol: protocol.clone(),
        xml,
        fingerprint,
        merged_at: Utc::now(),
    })
}

/// Poll the authority until the document's protocol turns terminal.
///
/// Bounded three ways: attempt count, elapsed window, and the caller's
/// deadline. Every sleep adds random jitter so a fleet of emitters does
/// not query in phase.
pub async fn await_protocol<E: AuthorityEndpoint>(
    client: &AuthorityClient<E>,
    access_key: &AccessKey,
    policy: &PollingPolicy,
    deadline: Option<Instant>,
) -> Result<AuthorityProtocol, ReconcileError> {
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
        if let Some(limit) = deadline {
            if Instant::now() >= limit {
                return Err(TransportError::DeadlineExceeded.into());
            }
        }

        attempts += 1;
        match client.query(access_key, deadline).await? {
            QueryOutcome::Concluded(protocol) => return Ok(protocol),
            QueryOutcome::Refused { code, message } => {
                return Err(ReconcileError::QueryRefused { code, message })
            }
            QueryOutcome::Processing { code, .. } => {
                tracing::debug!(access_key = %access_key, attempts, code = %code, "still processing");
            }
        }

        if attempts >= policy.max_attempts {
            return Err(ReconcileError::PendingTimeout {
                attempts,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }

        let jitter = rand::thread_rng().gen_range(0..=policy.jitter_ms);
        let delay = policy.interval + std::time::Duration::from_millis(jitter);
        if started.elapsed() + delay >= policy.max_elapsed {
            return Err(ReconcileError::PendingTimeout {
                attempts,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
        if let Some(limit) = deadline {
            if Instant::now() + delay >= limit {
                return Err(TransportError::DeadlineExceeded.into());
            }
        }
        sleep(delay).await;
    }
}

/// Poll until terminal, then merge. The whole reconciliation stage in one
/// call.
pub async fn reconcile_with_authority<E: AuthorityEndpoint>(
    client: &AuthorityClient<E>,
    signed: &SignedDocument,
    policy: &PollingPolicy,
    deadline: Option<Instant>,
) -> Result<FinalDocument, ReconcileError> {
    let protocol = await_protocol(client, signed.access_key(), policy, deadline).await?;
    merge_protocol(signed, &protocol)
}
