//! Submission and query envelopes, and the parsing of authority responses.
//!
//! Envelopes are assembled by string concatenation on purpose: the signed
//! document must be embedded byte for byte, and every other interpolated
//! value is validated to be wire-safe (digits and fixed vocabulary) before
//! it gets anywhere near the envelope.
//!
//! Responses are parsed tolerantly through [`XmlNode`] and classified by
//! status code alone. The protocol element is kept as a parsed node so the
//! reconciler can re-serialize it without losing fields this crate never
//! heard of.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{
    Environment, MAX_BATCH_SIZE, SCHEMA_VERSION, STATUS_AUTHORIZED, STATUS_BATCH_PROCESSED,
    STATUS_DENIED, STATUS_PROCESSING, STATUS_QUEUED,
};
use crate::document::types::DocumentKind;
use crate::document::AccessKey;
use crate::sign::SignedDocument;
use crate::transport::TransportError;
use crate::xml::{XmlError, XmlNode};

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

// ---------------------------------------------------------------------------
// Envelope construction
// ---------------------------------------------------------------------------

/// Wrap signed documents in a submission envelope.
///
/// A batch must be non-empty, homogeneous in document kind, and at most
/// [`MAX_BATCH_SIZE`] documents. The batch id travels as `idLote` and must
/// be purely numeric.
pub fn submission_envelope(
    batch_id: &str,
    documents: &[&SignedDocument],
    environment: Environment,
) -> Result<String, TransportError> {
    if documents.is_empty() {
        return Err(TransportError::InvalidBatch {
            reason: "batch is empty".into(),
        });
    }
    if documents.len() > MAX_BATCH_SIZE {
        return Err(TransportError::InvalidBatch {
            reason: format!("batch has {} documents, limit is {MAX_BATCH_SIZE}", documents.len()),
        });
    }
    if batch_id.is_empty() || !batch_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TransportError::InvalidBatch {
            reason: format!("batch id {batch_id:?} is not numeric"),
        });
    }
    let kind = documents[0].draft.kind;
    if documents.iter().any(|d| d.draft.kind != kind) {
        return Err(TransportError::InvalidBatch {
            reason: "batch mixes document kinds".into(),
        });
    }
    for document in documents {
        if document.draft.environment != environment {
            return Err(TransportError::InvalidBatch {
                reason: format!(
                    "document {} was drafted for {} but the batch targets {}",
                    document.access_key(),
                    document.draft.environment,
                    environment
                ),
            });
        }
    }

    let tag = envelope_tag(kind);
    let mut envelope = String::with_capacity(
        256 + documents.iter().map(|d| d.xml.len()).sum::<usize>(),
    );
    envelope.push_str(XML_DECL);
    envelope.push_str(&format!(
        r#"<{tag} xmlns="{}" versao="{SCHEMA_VERSION}"><idLote>{batch_id}</idLote><indSinc>0</indSinc>"#,
        kind.namespace(),
    ));
    for document in documents {
        envelope.push_str(&document.xml);
    }
    envelope.push_str(&format!("</{tag}>"));
    Ok(envelope)
}

/// Build a situation-query envelope for one access key.
pub fn query_envelope(access_key: &AccessKey, environment: Environment) -> String {
    let kind = access_key.kind().unwrap_or(DocumentKind::Goods);
    format!(
        r#"{XML_DECL}<consSitNFe xmlns="{}" versao="{SCHEMA_VERSION}"><tpAmb>{}</tpAmb><xServ>CONSULTAR</xServ><chNFe>{}</chNFe></consSitNFe>"#,
        kind.namespace(),
        environment.wire_code(),
        access_key.as_str(),
    )
}

fn envelope_tag(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Goods => "enviNFe",
        DocumentKind::Service => "enviNFSe",
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Receipt for a batch the authority queued for asynchronous processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionAck {
    pub receipt: String,
    pub status_code: String,
    pub message: String,
    /// The authority's estimate of processing time, when it offers one.
    pub average_wait: Option<Duration>,
}

/// What came back from a submission.
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    /// Batch accepted for processing; poll with the receipt's access keys.
    Queued(SubmissionAck),
    /// Batch processed synchronously; the protocol came back inline.
    Processed(AuthorityProtocol),
    /// The authority refused the batch. Same bytes, same answer; not retried.
    Rejected { code: String, message: String },
}

/// What came back from a situation query.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// Still in the authority's queue.
    Processing { code: String, message: String },
    /// Processing finished; the protocol is attached.
    Concluded(AuthorityProtocol),
    /// Terminal answer with no protocol, e.g. the key is unknown.
    Refused { code: String, message: String },
}

/// Business-level classification of a protocol status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStatus {
    Authorized,
    Denied,
    Rejected,
    Pending,
}

impl ProtocolStatus {
    pub fn from_code(code: &str) -> Self {
        match code {
            STATUS_AUTHORIZED => ProtocolStatus::Authorized,
            STATUS_DENIED => ProtocolStatus::Denied,
            STATUS_QUEUED | STATUS_PROCESSING => ProtocolStatus::Pending,
            _ => ProtocolStatus::Rejected,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProtocolStatus::Pending)
    }
}

/// The authority's protocol for one document.
///
/// `node` holds the protocol element exactly as parsed, so re-serializing
/// preserves fields beyond the ones lifted into this struct.
#[derive(Debug, Clone)]
pub struct AuthorityProtocol {
    pub access_key: String,
    pub protocol_number: Option<String>,
    pub status: ProtocolStatus,
    pub status_code: String,
    pub message: String,
    pub processed_at: Option<DateTime<Utc>>,
    /// The authority's echo of the digest it verified, when present.
    pub digest_value: Option<String>,
    pub node: XmlNode,
}

impl AuthorityProtocol {
    /// Serialize the protocol element as received, unknown fields included.
    pub fn to_xml(&self) -> Result<String, XmlError> {
        self.node.to_xml()
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Parse a submission response and classify it by status code.
pub fn parse_submission_response(
    xml: &str,
    environment: Environment,
) -> Result<SubmissionOutcome, TransportError> {
    let root = XmlNode::parse(xml)?;
    check_environment_echo(&root, environment)?;

    let code = required_text(&root, "cStat")?;
    let message = root.child_text("xMotivo").unwrap_or_default().to_string();

    match code.as_str() {
        STATUS_QUEUED => {
            let info = root
                .child("infRec")
                .ok_or_else(|| TransportError::MalformedResponse {
                    reason: "queued response carries no receipt block".into(),
                })?;
            let receipt = info
                .child_text("nRec")
                .ok_or_else(|| TransportError::MalformedResponse {
                    reason: "receipt block carries no receipt number".into(),
                })?
                .to_string();
            let average_wait = info
                .child_text("tMed")
                .and_then(|t| t.parse::<u64>().ok())
                .map(Duration::from_secs);
            Ok(SubmissionOutcome::Queued(SubmissionAck {
                receipt,
                status_code: code,
                message,
                average_wait,
            }))
        }
        STATUS_BATCH_PROCESSED => {
            let node = protocol_child(&root).ok_or_else(|| TransportError::MalformedResponse {
                reason: "processed response carries no protocol element".into(),
            })?;
            Ok(SubmissionOutcome::Processed(parse_protocol_node(
                node.clone(),
                environment,
            )?))
        }
        _ => Ok(SubmissionOutcome::Rejected { code, message }),
    }
}

/// Parse a situation-query response.
pub fn parse_query_response(
    xml: &str,
    environment: Environment,
) -> Result<QueryOutcome, TransportError> {
    let root = XmlNode::parse(xml)?;
    check_environment_echo(&root, environment)?;

    let code = required_text(&root, "cStat")?;
    let message = root.child_text("xMotivo").unwrap_or_default().to_string();

    if let Some(node) = protocol_child(&root) {
        return Ok(QueryOutcome::Concluded(parse_protocol_node(
            node.clone(),
            environment,
        )?));
    }
    match code.as_str() {
        STATUS_QUEUED | STATUS_PROCESSING => Ok(QueryOutcome::Processing { code, message }),
        _ => Ok(QueryOutcome::Refused { code, message }),
    }
}

/// Lift the interesting fields out of a protocol element, keeping the
/// element itself for lossless re-serialization.
pub fn parse_protocol_node(
    node: XmlNode,
    environment: Environment,
) -> Result<AuthorityProtocol, TransportError> {
    let (access_key, protocol_number, status_code, message, processed_at, digest_value) = {
        let inf = node.child("infProt").unwrap_or(&node);
        check_environment_echo(inf, environment)?;
        let access_key = inf
            .child_text("chNFe")
            .or_else(|| inf.child_text("chNFSe"))
            .ok_or_else(|| TransportError::MalformedResponse {
                reason: "protocol carries no access key".into(),
            })?
            .to_string();
        let status_code = required_text(inf, "cStat")?;
        (
            access_key,
            inf.child_text("nProt").map(str::to_string),
            status_code,
            inf.child_text("xMotivo").unwrap_or_default().to_string(),
            inf.child_text("dhRecbto")
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            inf.child_text("digVal").map(str::to_string),
        )
    };

    Ok(AuthorityProtocol {
        access_key,
        protocol_number,
        status: ProtocolStatus::from_code(&status_code),
        status_code,
        message,
        processed_at,
        digest_value,
        node,
    })
}

fn protocol_child(root: &XmlNode) -> Option<&XmlNode> {
    root.child("protNFe").or_else(|| root.child("protNFSe"))
}

fn required_text(node: &XmlNode, tag: &str) -> Result<String, TransportError> {
    node.child_text(tag)
        .map(str::to_string)
        .ok_or_else(|| TransportError::MalformedResponse {
            reason: format!("response carries no {tag}"),
        })
}

fn check_environment_echo(node: &XmlNode, environment: Environment) -> Result<(), TransportError> {
    if let Some(echo) = node.child_text("tpAmb") {
        if echo != environment.wire_code() {
            return Err(TransportError::MalformedResponse {
                reason: format!(
                    "response environment {echo} does not match configured {}",
                    environment.wire_code()
                ),
            });
        }
    }
    Ok(())
}
