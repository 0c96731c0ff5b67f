//! # Emission Orchestration
//!
//! One emission is a march through a handful of states:
//!
//! ```text
//! Drafted -> Signed -> Submitted -> Queued -> Authorized
//!                          |           |          |
//!                          |           +-> Denied +-> (terminal)
//!                          +-> Rejected
//! ```
//!
//! Terminal states are immutable. A denied document consumes its numbering
//! forever; a rejected one releases it for a corrected attempt; a transport
//! failure leaves the claim in place because the authority may have seen
//! the document.
//!
//! [`EmissionPipeline`] drives the whole march: build, claim numbering,
//! sign, submit, poll, merge. Records of every emission are kept in memory
//! and queryable by access key.

use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::EmitterConfig;
use crate::document::builder::{DraftBuilder, ValidationError};
use crate::document::types::{FiscalDocumentDraft, InvoicePayload, Numbering};
use crate::document::{AccessKey, NumberingKey, NumberingRegistry};
use crate::reconcile::{
    await_protocol, merge_protocol, FinalDocument, ReconcileError,
};
use crate::render::RenderError;
use crate::sign::{sign_draft, SignedDocument, SigningCredentials, SigningError};
use crate::transport::client::{AuthorityClient, AuthorityEndpoint};
use crate::transport::envelope::{AuthorityProtocol, SubmissionOutcome};
use crate::transport::TransportError;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Where an emission stands. See the module docs for the legal moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionState {
    Drafted,
    Signed,
    Submitted,
    Queued,
    Authorized,
    Denied,
    Rejected,
}

impl EmissionState {
    /// Whether `next` is a legal successor of `self`. Terminal states
    /// accept nothing.
    pub fn can_transition_to(self, next: EmissionState) -> bool {
        use EmissionState::*;
        matches!(
            (self, next),
            (Drafted, Signed)
                | (Signed, Submitted)
                | (Submitted, Queued)
                | (Submitted, Authorized)
                | (Submitted, Denied)
                | (Submitted, Rejected)
                | (Queued, Authorized)
                | (Queued, Denied)
                | (Queued, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EmissionState::Authorized | EmissionState::Denied | EmissionState::Rejected
        )
    }
}

impl fmt::Display for EmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drafted => write!(f, "drafted"),
            Self::Signed => write!(f, "signed"),
            Self::Submitted => write!(f, "submitted"),
            Self::Queued => write!(f, "queued"),
            Self::Authorized => write!(f, "authorized"),
            Self::Denied => write!(f, "denied"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("illegal state transition from {from} to {to}")]
    InvalidTransition {
        from: EmissionState,
        to: EmissionState,
    },

    #[error("no signed document held for access key {0}")]
    UnknownDocument(String),
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The audit record of one emission, updated at every state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmissionRecord {
    pub id: Uuid,
    pub access_key: AccessKey,
    pub numbering: Numbering,
    pub state: EmissionState,
    pub receipt: Option<String>,
    pub protocol_number: Option<String>,
    pub status_code: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmissionRecord {
    pub fn new(draft: &FiscalDocumentDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            access_key: draft.access_key.clone(),
            numbering: draft.numbering,
            state: EmissionState::Drafted,
            receipt: None,
            protocol_number: None,
            status_code: None,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting moves the state chart does not allow.
    pub fn transition(&mut self, next: EmissionState) -> Result<(), EmissionError> {
        if !self.state.can_transition_to(next) {
            return Err(EmissionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn note_protocol(&mut self, protocol: &AuthorityProtocol) {
        self.protocol_number = protocol.protocol_number.clone();
        self.status_code = Some(protocol.status_code.clone());
        self.message = Some(protocol.message.clone());
    }

    fn note_status(&mut self, code: &str, message: &str) {
        self.status_code = Some(code.to_string());
        self.message = Some(message.to_string());
    }
}

/// What a completed emission hands back: the record and the merged
/// artifact.
#[derive(Debug, Clone)]
pub struct EmissionOutcome {
    pub record: EmissionRecord,
    pub final_document: FinalDocument,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The end-to-end emission driver. One instance per emitter identity,
/// shared freely across tasks.
pub struct EmissionPipeline<E> {
    config: EmitterConfig,
    credentials: SigningCredentials,
    client: AuthorityClient<E>,
    numbering: NumberingRegistry,
    records: DashMap<String, EmissionRecord>,
    signed: DashMap<String, SignedDocument>,
    finals: DashMap<String, FinalDocument>,
}

impl<E: AuthorityEndpoint> EmissionPipeline<E> {
    pub fn new(config: EmitterConfig, credentials: SigningCredentials, endpoint: E) -> Self {
        let client = AuthorityClient::new(endpoint, config.environment, config.transport.clone());
        Self {
            config,
            credentials,
            client,
            numbering: NumberingRegistry::new(),
            records: DashMap::new(),
            signed: DashMap::new(),
            finals: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    /// Validate a payload into a draft without claiming its numbering.
    pub fn build_draft(&self, payload: &InvoicePayload) -> Result<FiscalDocumentDraft, ValidationError> {
        DraftBuilder::from_payload(payload).build(&self.config)
    }

    /// The record for an access key, if this pipeline has seen it.
    pub fn record(&self, access_key: &str) -> Option<EmissionRecord> {
        self.records.get(access_key).map(|r| r.clone())
    }

    /// The signed artifact for an access key, if still held.
    pub fn signed_document(&self, access_key: &str) -> Option<SignedDocument> {
        self.signed.get(access_key).map(|d| d.clone())
    }

    /// The merged final artifact for an authorized access key.
    pub fn final_document(&self, access_key: &str) -> Option<FinalDocument> {
        self.finals.get(access_key).map(|d| d.clone())
    }

    /// Snapshot of all records, newest first.
    pub fn records(&self) -> Vec<EmissionRecord> {
        let mut all: Vec<EmissionRecord> = self.records.iter().map(|r| r.clone()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Drive one payload from draft to final document.
    ///
    /// The numbering claim happens right after validation and before
    /// signing, so a duplicate number fails fast and nothing is signed.
    pub async fn emit(
        &self,
        payload: &InvoicePayload,
        deadline: Option<Instant>,
    ) -> Result<EmissionOutcome, EmissionError> {
        let draft = self.build_draft(payload)?;
        let numbering_key = draft.numbering_key();
        self.numbering.claim(numbering_key.clone())?;

        let mut record = EmissionRecord::new(&draft);
        let store_key = draft.access_key.as_str().to_string();
        self.store(&store_key, &record);
        tracing::info!(access_key = %draft.access_key, numbering = %draft.numbering, "emission started");

        let signed = match sign_draft(draft, &self.credentials) {
            Ok(signed) => signed,
            Err(e) => {
                // Nothing left the building; the number is reusable and
                // the record would only mislead.
                self.numbering.release(&numbering_key);
                self.records.remove(&store_key);
                return Err(e.into());
            }
        };
        record.transition(EmissionState::Signed)?;
        self.signed.insert(store_key.clone(), signed.clone());
        self.store(&store_key, &record);

        record.transition(EmissionState::Submitted)?;
        self.store(&store_key, &record);
        let outcome = match self.client.submit_document(&signed, deadline).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The authority may have received the document. The claim
                // stays; the operator decides after checking by key.
                return Err(e.into());
            }
        };

        match outcome {
            SubmissionOutcome::Queued(ack) => {
                record.transition(EmissionState::Queued)?;
                record.receipt = Some(ack.receipt.clone());
                record.note_status(&ack.status_code, &ack.message);
                self.store(&store_key, &record);

                let protocol = await_protocol(
                    &self.client,
                    signed.access_key(),
                    &self.config.polling,
                    deadline,
                )
                .await?;
                self.conclude(record, &store_key, &numbering_key, &signed, &protocol)
            }
            SubmissionOutcome::Processed(protocol) => {
                self.conclude(record, &store_key, &numbering_key, &signed, &protocol)
            }
            SubmissionOutcome::Rejected { code, message } => {
                record.transition(EmissionState::Rejected)?;
                record.note_status(&code, &message);
                self.store(&store_key, &record);
                // A rejection consumes nothing; the number may try again.
                self.numbering.release(&numbering_key);
                Err(ReconcileError::Rejected { code, message }.into())
            }
        }
    }

    /// Emit and render the final document in one call.
    pub async fn emit_and_render(
        &self,
        payload: &InvoicePayload,
        deadline: Option<Instant>,
    ) -> Result<(EmissionOutcome, Vec<u8>), EmissionError> {
        let outcome = self.emit(payload, deadline).await?;
        let pdf = crate::render::render_document(&outcome.final_document.xml)?;
        Ok((outcome, pdf))
    }

    /// Query the authority again for a document that timed out while
    /// queued, and conclude it if a terminal protocol is now available.
    pub async fn resume(
        &self,
        access_key: &str,
        deadline: Option<Instant>,
    ) -> Result<EmissionOutcome, EmissionError> {
        let signed = self
            .signed_document(access_key)
            .ok_or_else(|| EmissionError::UnknownDocument(access_key.to_string()))?;
        let record = self
            .records
            .get(access_key)
            .map(|r| r.clone())
            .unwrap_or_else(|| EmissionRecord::new(&signed.draft));
        let numbering_key = signed.draft.numbering_key();

        let protocol = await_protocol(
            &self.client,
            signed.access_key(),
            &self.config.polling,
            deadline,
        )
        .await?;
        self.conclude(record, access_key, &numbering_key, &signed, &protocol)
    }

    fn conclude(
        &self,
        mut record: EmissionRecord,
        store_key: &str,
        numbering_key: &NumberingKey,
        signed: &SignedDocument,
        protocol: &AuthorityProtocol,
    ) -> Result<EmissionOutcome, EmissionError> {
        match merge_protocol(signed, protocol) {
            Ok(final_document) => {
                record.transition(EmissionState::Authorized)?;
                record.note_protocol(protocol);
                self.store(store_key, &record);
                self.finals
                    .insert(store_key.to_string(), final_document.clone());
                Ok(EmissionOutcome {
                    record,
                    final_document,
                })
            }
            Err(ReconcileError::Denied { code, message }) => {
                record.transition(EmissionState::Denied)?;
                record.note_status(&code, &message);
                self.store(store_key, &record);
                // Denial consumes the numbering permanently.
                Err(ReconcileError::Denied { code, message }.into())
            }
            Err(ReconcileError::Rejected { code, message }) => {
                record.transition(EmissionState::Rejected)?;
                record.note_status(&code, &message);
                self.store(store_key, &record);
                self.numbering.release(numbering_key);
                Err(ReconcileError::Rejected { code, message }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, key: &str, record: &EmissionRecord) {
        self.records.insert(key.to_string(), record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::document::types::{DocumentKind, LineItemPayload, Party};
    use crate::transport::client::testing::ScriptedEndpoint;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn test_config() -> EmitterConfig {
        let mut config = EmitterConfig::new(
            Environment::Homologation,
            35,
            "12345678000195",
            "/tmp/key.sealed",
            "/tmp/cert.json",
            "passphrase",
        );
        config.polling.interval = std::time::Duration::from_millis(50);
        config.polling.jitter_ms = 5;
        config.polling.max_attempts = 4;
        config
    }

    fn payload(number: u32) -> InvoicePayload {
        InvoicePayload {
            kind: DocumentKind::Goods,
            series: 1,
            number,
            issued_at: Utc.with_ymd_and_hms(2026, 8, 15, 14, 0, 0).unwrap(),
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
                unit_value_cents: 1500,
            }],
            tax_base_cents: 0,
            tax_cents: 0,
            freight_cents: 0,
            discount_cents: 0,
            other_cents: 0,
            declared_total_cents: None,
            additional_info: None,
            extras: BTreeMap::new(),
        }
    }

    fn pipeline(endpoint: Arc<ScriptedEndpoint>) -> EmissionPipeline<Arc<ScriptedEndpoint>> {
        EmissionPipeline::new(
            test_config(),
            SigningCredentials::provision("12345678000195", 365),
            endpoint,
        )
    }

    const QUEUED_RESPONSE: &str = r#"<retEnviNFe versao="4.00"><tpAmb>2</tpAmb><cStat>103</cStat><xMotivo>Lote recebido</xMotivo><infRec><nRec>351000012345678</nRec></infRec></retEnviNFe>"#;
    const PROCESSING_RESPONSE: &str = r#"<retConsSitNFe versao="4.00"><tpAmb>2</tpAmb><cStat>105</cStat><xMotivo>Em processamento</xMotivo></retConsSitNFe>"#;

    fn authorized_response(access_key: &str) -> String {
        format!(
            r#"<retConsSitNFe versao="4.00"><tpAmb>2</tpAmb><cStat>100</cStat><xMotivo>Autorizado o uso</xMotivo><protNFe versao="4.00"><infProt><tpAmb>2</tpAmb><chNFe>{access_key}</chNFe><dhRecbto>2026-08-15T14:01:00-03:00</dhRecbto><nProt>135202600000777</nProt><cStat>100</cStat><xMotivo>Autorizado o uso</xMotivo></infProt></protNFe></retConsSitNFe>"#
        )
    }

    fn denied_response(access_key: &str) -> String {
        format!(
            r#"<retConsSitNFe versao="4.00"><tpAmb>2</tpAmb><cStat>110</cStat><protNFe versao="4.00"><infProt><chNFe>{access_key}</chNFe><cStat>110</cStat><xMotivo>Uso denegado</xMotivo></infProt></protNFe></retConsSitNFe>"#
        )
    }

    /// The access key a payload will produce, computed the same way emit
    /// does.
    fn expected_key(pipeline: &EmissionPipeline<Arc<ScriptedEndpoint>>, number: u32) -> String {
        pipeline
            .build_draft(&payload(number))
            .unwrap()
            .access_key
            .as_str()
            .to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn emit_queued_then_authorized() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let pipeline = pipeline(endpoint.clone());
        let key = expected_key(&pipeline, 100);

        endpoint.script_submit(Ok(QUEUED_RESPONSE.to_string()));
        endpoint.script_query(Ok(PROCESSING_RESPONSE.to_string()));
        endpoint.script_query(Ok(authorized_response(&key)));

        let outcome = pipeline.emit(&payload(100), None).await.unwrap();
        assert_eq!(outcome.record.state, EmissionState::Authorized);
        assert_eq!(outcome.record.receipt.as_deref(), Some("351000012345678"));
        assert_eq!(
            outcome.record.protocol_number.as_deref(),
            Some("135202600000777")
        );
        assert!(outcome.final_document.xml.starts_with("<nfeProc "));

        let stored = pipeline.record(&key).unwrap();
        assert_eq!(stored.state, EmissionState::Authorized);
    }

    #[tokio::test(start_paused = true)]
    async fn synchronous_processing_authorizes_without_polling() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let pipeline = pipeline(endpoint.clone());
        let key = expected_key(&pipeline, 101);

        let sync_response = format!(
            r#"<retEnviNFe versao="4.00"><tpAmb>2</tpAmb><cStat>104</cStat><xMotivo>Lote processado</xMotivo><protNFe versao="4.00"><infProt><tpAmb>2</tpAmb><chNFe>{key}</chNFe><nProt>135202600000778</nProt><cStat>100</cStat><xMotivo>Autorizado o uso</xMotivo></infProt></protNFe></retEnviNFe>"#
        );
        endpoint.script_submit(Ok(sync_response));

        let outcome = pipeline.emit(&payload(101), None).await.unwrap();
        assert_eq!(outcome.record.state, EmissionState::Authorized);
        assert_eq!(endpoint.query_calls(), 0);
    }

    #[tokio::test]
    async fn duplicate_numbering_fails_before_signing() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let pipeline = pipeline(endpoint.clone());
        let key = expected_key(&pipeline, 102);

        endpoint.script_submit(Ok(QUEUED_RESPONSE.to_string()));
        endpoint.script_query(Ok(authorized_response(&key)));
        pipeline.emit(&payload(102), None).await.unwrap();

        let err = pipeline.emit(&payload(102), None).await.unwrap_err();
        match err {
            EmissionError::Validation(validation) => {
                assert!(validation.mentions("numbering"));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
        // No second submission went out.
        assert_eq!(endpoint.submit_calls(), 1);
    }

    #[tokio::test]
    async fn rejection_releases_the_numbering() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let pipeline = pipeline(endpoint.clone());
        let key = expected_key(&pipeline, 103);

        let rejected = r#"<retEnviNFe versao="4.00"><tpAmb>2</tpAmb><cStat>225</cStat><xMotivo>Falha de schema</xMotivo></retEnviNFe>"#;
        endpoint.script_submit(Ok(rejected.to_string()));

        let err = pipeline.emit(&payload(103), None).await.unwrap_err();
        assert!(matches!(
            err,
            EmissionError::Reconcile(ReconcileError::Rejected { .. })
        ));
        assert_eq!(
            pipeline.record(&key).unwrap().state,
            EmissionState::Rejected
        );

        // Same numbering goes through on the corrected retry.
        endpoint.script_submit(Ok(QUEUED_RESPONSE.to_string()));
        endpoint.script_query(Ok(authorized_response(&key)));
        let outcome = pipeline.emit(&payload(103), None).await.unwrap();
        assert_eq!(outcome.record.state, EmissionState::Authorized);
    }

    #[tokio::test(start_paused = true)]
    async fn denial_consumes_the_numbering() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let pipeline = pipeline(endpoint.clone());
        let key = expected_key(&pipeline, 104);

        endpoint.script_submit(Ok(QUEUED_RESPONSE.to_string()));
        endpoint.script_query(Ok(denied_response(&key)));

        let err = pipeline.emit(&payload(104), None).await.unwrap_err();
        assert!(matches!(
            err,
            EmissionError::Reconcile(ReconcileError::Denied { .. })
        ));
        assert_eq!(pipeline.record(&key).unwrap().state, EmissionState::Denied);

        // The number stays burned.
        let err = pipeline.emit(&payload(104), None).await.unwrap_err();
        assert!(matches!(err, EmissionError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_timeout_leaves_the_record_queued() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let pipeline = pipeline(endpoint.clone());
        let key = expected_key(&pipeline, 105);

        endpoint.script_submit(Ok(QUEUED_RESPONSE.to_string()));
        for _ in 0..test_config().polling.max_attempts {
            endpoint.script_query(Ok(PROCESSING_RESPONSE.to_string()));
        }

        let err = pipeline.emit(&payload(105), None).await.unwrap_err();
        assert!(matches!(
            err,
            EmissionError::Reconcile(ReconcileError::PendingTimeout { .. })
        ));
        let record = pipeline.record(&key).unwrap();
        assert_eq!(record.state, EmissionState::Queued);
        assert!(record.receipt.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_concludes_a_timed_out_emission() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let pipeline = pipeline(endpoint.clone());
        let key = expected_key(&pipeline, 109);

        endpoint.script_submit(Ok(QUEUED_RESPONSE.to_string()));
        for _ in 0..test_config().polling.max_attempts {
            endpoint.script_query(Ok(PROCESSING_RESPONSE.to_string()));
        }
        pipeline.emit(&payload(109), None).await.unwrap_err();
        assert!(pipeline.final_document(&key).is_none());

        // The authority finished in the meantime.
        endpoint.script_query(Ok(authorized_response(&key)));
        let outcome = pipeline.resume(&key, None).await.unwrap();
        assert_eq!(outcome.record.state, EmissionState::Authorized);
        assert!(pipeline.final_document(&key).is_some());
        assert_eq!(
            pipeline.final_document(&key).unwrap().fingerprint,
            outcome.final_document.fingerprint
        );
    }

    #[tokio::test]
    async fn resume_of_unknown_key_fails_cleanly() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let pipeline = pipeline(endpoint.clone());
        let err = pipeline
            .resume("35260812345678000195550010000000011000000010", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EmissionError::UnknownDocument(_)));
        assert_eq!(endpoint.query_calls(), 0);
    }

    #[tokio::test]
    async fn signing_failure_releases_numbering_and_record() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        // Certificate subject does not cover the payload issuer.
        let pipeline = EmissionPipeline::new(
            test_config(),
            SigningCredentials::provision("99999999000199", 365),
            endpoint.clone(),
        );
        let key = {
            let draft = pipeline.build_draft(&payload(106)).unwrap();
            draft.access_key.as_str().to_string()
        };

        let err = pipeline.emit(&payload(106), None).await.unwrap_err();
        assert!(matches!(err, EmissionError::Signing(_)));
        assert!(pipeline.record(&key).is_none());
        let draft = pipeline.build_draft(&payload(106)).unwrap();
        assert!(!pipeline.numbering.is_claimed(&draft.numbering_key()));
        assert_eq!(endpoint.submit_calls(), 0);
    }

    #[tokio::test]
    async fn transport_failure_keeps_the_claim() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let pipeline = pipeline(endpoint.clone());

        endpoint.script_submit(Err(TransportError::Refused {
            message: "http status 403".into(),
        }));
        let err = pipeline.emit(&payload(107), None).await.unwrap_err();
        assert!(matches!(err, EmissionError::Transport(_)));

        let draft = pipeline.build_draft(&payload(107)).unwrap();
        assert!(pipeline.numbering.is_claimed(&draft.numbering_key()));
    }

    #[test]
    fn terminal_states_accept_no_transitions() {
        for terminal in [
            EmissionState::Authorized,
            EmissionState::Denied,
            EmissionState::Rejected,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                EmissionState::Drafted,
                EmissionState::Signed,
                EmissionState::Submitted,
                EmissionState::Queued,
                EmissionState::Authorized,
                EmissionState::Denied,
                EmissionState::Rejected,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn record_rejects_illegal_transition() {
        let config = test_config();
        let draft = DraftBuilder::from_payload(&payload(108))
            .build(&config)
            .unwrap();
        let mut record = EmissionRecord::new(&draft);
        record.transition(EmissionState::Signed).unwrap();
        let err = record.transition(EmissionState::Authorized).unwrap_err();
        assert!(matches!(err, EmissionError::InvalidTransition { .. }));
        // The failed move left the state alone.
        assert_eq!(record.state, EmissionState::Signed);
    }

    #[test]
    fn state_display_is_lowercase() {
        assert_eq!(EmissionState::Queued.to_string(), "queued");
        assert_eq!(EmissionState::Authorized.to_string(), "authorized");
    }
}
