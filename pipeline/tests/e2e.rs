//! End-to-end integration tests for the emission pipeline.
//!
//! These tests exercise the full document lifecycle from domain payload
//! through final artifact: draft construction, numbering claims, enveloped
//! signing, envelope submission, protocol polling, the byte-preserving
//! merge, and sheet rendering. The authority is a scripted double wired in
//! through the public [`AuthorityEndpoint`] seam, so every network outcome
//! the real gateway can produce is replayed here deterministically.
//!
//! Each test stands alone with its own pipeline and scripted authority.
//! No shared state, no test ordering dependencies, no flaky failures.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use lavra_pipeline::config::{EmitterConfig, Environment};
use lavra_pipeline::document::{DocumentKind, InvoicePayload, LineItemPayload, Party};
use lavra_pipeline::emission::{EmissionError, EmissionPipeline, EmissionState};
use lavra_pipeline::reconcile::ReconcileError;
use lavra_pipeline::sign::verify_signed_document;
use lavra_pipeline::transport::{AuthorityEndpoint, TransportError};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

/// A stand-in authority: replays scripted responses in order and keeps
/// every envelope it was handed, so tests can assert on the exact bytes
/// that would have crossed the wire.
#[derive(Default)]
struct AuthorityDouble {
    submissions: Mutex<Vec<String>>,
    queries: Mutex<Vec<String>>,
    submit_script: Mutex<VecDeque<Result<String, TransportError>>>,
    query_script: Mutex<VecDeque<Result<String, TransportError>>>,
}

impl AuthorityDouble {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enqueue_submit(&self, response: Result<String, TransportError>) {
        self.submit_script.lock().push_back(response);
    }

    fn enqueue_query(&self, response: Result<String, TransportError>) {
        self.query_script.lock().push_back(response);
    }

    fn submissions(&self) -> Vec<String> {
        self.submissions.lock().clone()
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl AuthorityEndpoint for AuthorityDouble {
    async fn submit(&self, envelope: &str) -> Result<String, TransportError> {
        self.submissions.lock().push(envelope.to_string());
        self.submit_script
            .lock()
            .pop_front()
            .unwrap_or(Err(TransportError::Unreachable {
                message: "submit script exhausted".into(),
            }))
    }

    async fn query(&self, envelope: &str) -> Result<String, TransportError> {
        self.queries.lock().push(envelope.to_string());
        self.query_script
            .lock()
            .pop_front()
            .unwrap_or(Err(TransportError::Unreachable {
                message: "query script exhausted".into(),
            }))
    }
}

const ISSUER_TAX_ID: &str = "12345678000195";

fn emitter_config() -> EmitterConfig {
    let mut config = EmitterConfig::new(
        Environment::Homologation,
        35,
        ISSUER_TAX_ID,
        "/tmp/e2e-key.sealed",
        "/tmp/e2e-cert.json",
        "e2e-passphrase",
    );
    config.polling.interval = std::time::Duration::from_millis(20);
    config.polling.jitter_ms = 2;
    config.polling.max_attempts = 5;
    config
}

fn build_pipeline(authority: Arc<AuthorityDouble>) -> EmissionPipeline<Arc<AuthorityDouble>> {
    EmissionPipeline::new(
        emitter_config(),
        lavra_pipeline::sign::SigningCredentials::provision(ISSUER_TAX_ID, 365),
        authority,
    )
}

fn invoice(number: u32) -> InvoicePayload {
    InvoicePayload {
        kind: DocumentKind::Goods,
        series: 1,
        number,
        issued_at: Utc.with_ymd_and_hms(2026, 8, 20, 9, 30, 0).unwrap(),
        issuer: Party {
            tax_id: ISSUER_TAX_ID.into(),
            name: "ACME Industria LTDA".into(),
            street: Some("Rua das Flores 100".into()),
            municipality: Some("Sao Paulo".into()),
            region: Some("SP".into()),
            postal_code: Some("01310100".into()),
            ..Party::default()
        },
        recipient: Party {
            tax_id: "98765432000109".into(),
            name: "Cliente SA".into(),
            ..Party::default()
        },
        items: vec![
            LineItemPayload {
                code: "SKU-1".into(),
                description: "Widget premium".into(),
                unit: "UN".into(),
                quantity_milli: 2000,
                unit_value_cents: 1550,
            },
            LineItemPayload {
                code: "SKU-2".into(),
                description: "Gadget comum".into(),
                unit: "CX".into(),
                quantity_milli: 1000,
                unit_value_cents: 900,
            },
        ],
        tax_base_cents: 4000,
        tax_cents: 720,
        freight_cents: 0,
        discount_cents: 0,
        other_cents: 0,
        declared_total_cents: Some(4000),
        additional_info: Some("Pedido PO-991".into()),
        extras: BTreeMap::new(),
    }
}

/// The access key this payload will get, computed through the same builder
/// the pipeline uses.
fn key_for(pipeline: &EmissionPipeline<Arc<AuthorityDouble>>, number: u32) -> String {
    pipeline
        .build_draft(&invoice(number))
        .unwrap()
        .access_key
        .as_str()
        .to_string()
}

const QUEUED: &str = r#"<retEnviNFe versao="4.00"><tpAmb>2</tpAmb><cStat>103</cStat><xMotivo>Lote recebido</xMotivo><infRec><nRec>351000099887766</nRec><tMed>1</tMed></infRec></retEnviNFe>"#;
const PROCESSING: &str = r#"<retConsSitNFe versao="4.00"><tpAmb>2</tpAmb><cStat>105</cStat><xMotivo>Em processamento</xMotivo></retConsSitNFe>"#;

fn authorized(access_key: &str) -> String {
    format!(
        r#"<retConsSitNFe versao="4.00"><tpAmb>2</tpAmb><cStat>100</cStat><xMotivo>Autorizado o uso</xMotivo><protNFe versao="4.00"><infProt><tpAmb>2</tpAmb><chNFe>{access_key}</chNFe><dhRecbto>2026-08-20T09:31:00-03:00</dhRecbto><nProt>135202600012345</nProt><digVal>ZmFrZQ==</digVal><cStat>100</cStat><xMotivo>Autorizado o uso</xMotivo></infProt></protNFe></retConsSitNFe>"#
    )
}

fn denied(access_key: &str) -> String {
    format!(
        r#"<retConsSitNFe versao="4.00"><tpAmb>2</tpAmb><cStat>110</cStat><protNFe versao="4.00"><infProt><tpAmb>2</tpAmb><chNFe>{access_key}</chNFe><nProt>135202600054321</nProt><cStat>110</cStat><xMotivo>Uso denegado: irregularidade fiscal do emitente</xMotivo></infProt></protNFe></retConsSitNFe>"#
    )
}

fn pdf_page_text(bytes: &[u8], page: u32) -> Vec<u8> {
    let doc = lopdf::Document::load_mem(bytes).expect("rendered output should parse as pdf");
    let pages = doc.get_pages();
    let page_id = pages[&page];
    doc.get_page_content(page_id).expect("page content")
}

fn content_has(content: &[u8], needle: &str) -> bool {
    content
        .windows(needle.len())
        .any(|window| window == needle.as_bytes())
}

// ---------------------------------------------------------------------------
// 1. Full Asynchronous Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn full_lifecycle_queued_polled_authorized() {
    let authority = AuthorityDouble::new();
    let pipeline = build_pipeline(authority.clone());
    let key = key_for(&pipeline, 710);

    authority.enqueue_submit(Ok(QUEUED.to_string()));
    authority.enqueue_query(Ok(PROCESSING.to_string()));
    authority.enqueue_query(Ok(PROCESSING.to_string()));
    authority.enqueue_query(Ok(authorized(&key)));

    let outcome = pipeline.emit(&invoice(710), None).await.unwrap();

    // Record reached the terminal success state with the authority's facts.
    assert_eq!(outcome.record.state, EmissionState::Authorized);
    assert_eq!(outcome.record.receipt.as_deref(), Some("351000099887766"));
    assert_eq!(
        outcome.record.protocol_number.as_deref(),
        Some("135202600012345")
    );
    assert_eq!(outcome.record.status_code.as_deref(), Some("100"));
    assert_eq!(outcome.record.access_key.as_str(), key);

    // The signed artifact is held, valid, and embedded verbatim in both the
    // submission envelope and the merged final document.
    let signed = pipeline.signed_document(&key).expect("signed artifact");
    verify_signed_document(&signed).unwrap();

    let submissions = authority.submissions();
    assert_eq!(submissions.len(), 1);
    assert!(submissions[0].contains("<idLote>"));
    assert!(submissions[0].contains(&signed.xml));

    assert!(outcome.final_document.xml.starts_with("<nfeProc "));
    assert!(outcome.final_document.xml.contains(&signed.xml));
    assert!(outcome.final_document.xml.contains("<protNFe"));
    assert!(outcome.final_document.xml.contains("135202600012345"));

    // Every status query carried the right access key.
    assert_eq!(authority.queries().len(), 3);
    for query in authority.queries() {
        assert!(query.contains(&key));
    }

    // The pipeline serves the artifact back by key.
    let held = pipeline.final_document(&key).expect("final artifact");
    assert_eq!(held.fingerprint, outcome.final_document.fingerprint);
}

// ---------------------------------------------------------------------------
// 2. Synchronous Authorization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn synchronous_batch_result_skips_polling() {
    let authority = AuthorityDouble::new();
    let pipeline = build_pipeline(authority.clone());
    let key = key_for(&pipeline, 711);

    let processed = format!(
        r#"<retEnviNFe versao="4.00"><tpAmb>2</tpAmb><cStat>104</cStat><xMotivo>Lote processado</xMotivo><protNFe versao="4.00"><infProt><tpAmb>2</tpAmb><chNFe>{key}</chNFe><nProt>135202600000555</nProt><cStat>100</cStat><xMotivo>Autorizado o uso</xMotivo></infProt></protNFe></retEnviNFe>"#
    );
    authority.enqueue_submit(Ok(processed));

    let outcome = pipeline.emit(&invoice(711), None).await.unwrap();
    assert_eq!(outcome.record.state, EmissionState::Authorized);
    assert!(authority.queries().is_empty());
}

// ---------------------------------------------------------------------------
// 3. Rejection Releases the Numbering
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn rejection_then_corrected_retry_reuses_the_number() {
    let authority = AuthorityDouble::new();
    let pipeline = build_pipeline(authority.clone());
    let key = key_for(&pipeline, 712);

    let rejected = r#"<retEnviNFe versao="4.00"><tpAmb>2</tpAmb><cStat>225</cStat><xMotivo>Rejeicao: falha no schema XML</xMotivo></retEnviNFe>"#;
    authority.enqueue_submit(Ok(rejected.to_string()));

    let err = pipeline.emit(&invoice(712), None).await.unwrap_err();
    match err {
        EmissionError::Reconcile(ReconcileError::Rejected { code, .. }) => {
            assert_eq!(code, "225");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(
        pipeline.record(&key).unwrap().state,
        EmissionState::Rejected
    );

    // The numbering was released, so the same series and number can be
    // emitted again after the payload is fixed.
    authority.enqueue_submit(Ok(QUEUED.to_string()));
    authority.enqueue_query(Ok(authorized(&key)));
    let outcome = pipeline.emit(&invoice(712), None).await.unwrap();
    assert_eq!(outcome.record.state, EmissionState::Authorized);
    assert_eq!(authority.submissions().len(), 2);
}

// ---------------------------------------------------------------------------
// 4. Denial Consumes the Numbering
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn denial_burns_the_number_permanently() {
    let authority = AuthorityDouble::new();
    let pipeline = build_pipeline(authority.clone());
    let key = key_for(&pipeline, 713);

    authority.enqueue_submit(Ok(QUEUED.to_string()));
    authority.enqueue_query(Ok(denied(&key)));

    let err = pipeline.emit(&invoice(713), None).await.unwrap_err();
    match err {
        EmissionError::Reconcile(ReconcileError::Denied { code, message }) => {
            assert_eq!(code, "110");
            assert!(message.contains("denegado"));
        }
        other => panic!("expected denial, got {other:?}"),
    }
    assert_eq!(pipeline.record(&key).unwrap().state, EmissionState::Denied);
    assert!(pipeline.final_document(&key).is_none());

    // A second attempt with the same numbering fails validation locally;
    // nothing further reaches the authority.
    let err = pipeline.emit(&invoice(713), None).await.unwrap_err();
    assert!(matches!(err, EmissionError::Validation(_)));
    assert_eq!(authority.submissions().len(), 1);
}

// ---------------------------------------------------------------------------
// 5. Pending Timeout and Resume
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn timed_out_emission_resumes_to_authorized() {
    let authority = AuthorityDouble::new();
    let pipeline = build_pipeline(authority.clone());
    let key = key_for(&pipeline, 714);

    authority.enqueue_submit(Ok(QUEUED.to_string()));
    for _ in 0..emitter_config().polling.max_attempts {
        authority.enqueue_query(Ok(PROCESSING.to_string()));
    }

    let err = pipeline.emit(&invoice(714), None).await.unwrap_err();
    assert!(matches!(
        err,
        EmissionError::Reconcile(ReconcileError::PendingTimeout { .. })
    ));

    // The document is parked in Queued with its receipt; the signed bytes
    // are still held for the follow-up.
    let record = pipeline.record(&key).unwrap();
    assert_eq!(record.state, EmissionState::Queued);
    assert!(record.receipt.is_some());
    let signed = pipeline.signed_document(&key).expect("signed artifact");

    // The authority finished in the meantime; resume concludes the march.
    authority.enqueue_query(Ok(authorized(&key)));
    let outcome = pipeline.resume(&key, None).await.unwrap();
    assert_eq!(outcome.record.state, EmissionState::Authorized);
    assert!(outcome.final_document.xml.contains(&signed.xml));
}

// ---------------------------------------------------------------------------
// 6. Transport Outage with Recovery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn connectivity_failures_are_retried_through_to_success() {
    let authority = AuthorityDouble::new();
    let pipeline = build_pipeline(authority.clone());
    let key = key_for(&pipeline, 715);

    authority.enqueue_submit(Err(TransportError::Unreachable {
        message: "connect timed out".into(),
    }));
    authority.enqueue_submit(Err(TransportError::ServerError { status: 503 }));
    authority.enqueue_submit(Ok(QUEUED.to_string()));
    authority.enqueue_query(Ok(authorized(&key)));

    let outcome = pipeline.emit(&invoice(715), None).await.unwrap();
    assert_eq!(outcome.record.state, EmissionState::Authorized);
    assert_eq!(authority.submissions().len(), 3);
}

// ---------------------------------------------------------------------------
// 7. Access Key Integrity at the Merge
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn protocol_for_another_document_never_merges() {
    let authority = AuthorityDouble::new();
    let pipeline = build_pipeline(authority.clone());
    let key = key_for(&pipeline, 716);
    let foreign_key = key_for(&pipeline, 999);
    assert_ne!(key, foreign_key);

    authority.enqueue_submit(Ok(QUEUED.to_string()));
    authority.enqueue_query(Ok(authorized(&foreign_key)));

    let err = pipeline.emit(&invoice(716), None).await.unwrap_err();
    assert!(matches!(
        err,
        EmissionError::Reconcile(ReconcileError::IntegrityMismatch { .. })
    ));

    // Nothing was merged and the record never left the queue.
    assert!(pipeline.final_document(&key).is_none());
    assert_eq!(pipeline.record(&key).unwrap().state, EmissionState::Queued);
}

// ---------------------------------------------------------------------------
// 8. Environment Echo Enforcement
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn wrong_environment_echo_is_a_malformed_response() {
    let authority = AuthorityDouble::new();
    let pipeline = build_pipeline(authority.clone());
    let key = key_for(&pipeline, 717);

    // Production echo answering a homologation submission.
    let crossed = authorized(&key).replace("<tpAmb>2</tpAmb>", "<tpAmb>1</tpAmb>");
    authority.enqueue_submit(Ok(QUEUED.to_string()));
    authority.enqueue_query(Ok(crossed));

    let err = pipeline.emit(&invoice(717), None).await.unwrap_err();
    assert!(matches!(
        err,
        EmissionError::Reconcile(ReconcileError::Transport(
            TransportError::MalformedResponse { .. }
        ))
    ));
}

// ---------------------------------------------------------------------------
// 9. Emit and Render
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn rendered_sheet_carries_the_payload_facts() {
    let authority = AuthorityDouble::new();
    let pipeline = build_pipeline(authority.clone());
    let key = key_for(&pipeline, 718);

    authority.enqueue_submit(Ok(QUEUED.to_string()));
    authority.enqueue_query(Ok(authorized(&key)));

    let (outcome, pdf) = pipeline.emit_and_render(&invoice(718), None).await.unwrap();
    assert_eq!(outcome.record.state, EmissionState::Authorized);
    assert!(pdf.starts_with(b"%PDF-"));

    let content = pdf_page_text(&pdf, 1);
    assert!(content_has(&content, "ACME Industria LTDA"));
    assert!(content_has(&content, "Widget premium"));
    assert!(content_has(&content, "Gadget comum"));
    // Two items: 2.000 x 15.50 plus 1.000 x 9.00.
    assert!(content_has(&content, "40.00"));
    assert!(content_has(&content, "135202600012345"));
    // Homologation sheets always say so.
    assert!(content_has(&content, "SEM VALOR FISCAL"));
}

// ---------------------------------------------------------------------------
// 10. Independent Emissions Stay Independent
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn two_emissions_keep_separate_records_and_artifacts() {
    let authority = AuthorityDouble::new();
    let pipeline = build_pipeline(authority.clone());
    let first_key = key_for(&pipeline, 720);
    let second_key = key_for(&pipeline, 721);

    authority.enqueue_submit(Ok(QUEUED.to_string()));
    authority.enqueue_query(Ok(authorized(&first_key)));
    authority.enqueue_submit(Ok(QUEUED.to_string()));
    authority.enqueue_query(Ok(authorized(&second_key)));

    let first = pipeline.emit(&invoice(720), None).await.unwrap();
    let second = pipeline.emit(&invoice(721), None).await.unwrap();

    assert_ne!(
        first.final_document.fingerprint,
        second.final_document.fingerprint
    );
    assert_eq!(pipeline.records().len(), 2);
    assert_eq!(
        pipeline.record(&first_key).unwrap().state,
        EmissionState::Authorized
    );
    assert_eq!(
        pipeline.record(&second_key).unwrap().state,
        EmissionState::Authorized
    );
    assert!(pipeline.final_document(&first_key).is_some());
    assert!(pipeline.final_document(&second_key).is_some());
}
