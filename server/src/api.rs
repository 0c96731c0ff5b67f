//! # REST API
//!
//! Builds the axum router that exposes the emission pipeline over HTTP.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                              | Description                     |
//! |--------|-----------------------------------|---------------------------------|
//! | GET    | `/health`                         | Liveness probe                  |
//! | GET    | `/status`                         | Emitter status summary          |
//! | GET    | `/emissions`                      | All tracked emission records    |
//! | POST   | `/emissions`                      | Emit a fiscal document          |
//! | GET    | `/emissions/:access_key`          | Emission record by access key   |
//! | POST   | `/emissions/:access_key/resume`   | Resume a queued emission        |
//! | GET    | `/emissions/:access_key/document` | Final authorized XML            |
//! | POST   | `/render`                         | Render a document bundle to PDF |

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use lavra_pipeline::document::InvoicePayload;
use lavra_pipeline::emission::{EmissionError, EmissionOutcome, EmissionPipeline, EmissionState};
use lavra_pipeline::reconcile::ReconcileError;
use lavra_pipeline::render::{render_document, RenderError};
use lavra_pipeline::transport::{AuthorityEndpoint, TransportError};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone; everything heavy sits behind `Arc`. Generic over the
/// authority endpoint so tests can wire in a scripted authority through
/// the same construction path `main` uses.
pub struct AppState<E> {
    /// The server's reported version string.
    pub version: String,
    /// Environment label ("homologation" or "production").
    pub environment: String,
    /// The emission pipeline every handler drives.
    pub pipeline: Arc<EmissionPipeline<E>>,
    /// Reference to Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
    /// Server start time, for the uptime figure in `/status`.
    pub started_at: DateTime<Utc>,
}

// A derived Clone would demand E: Clone; the pipeline is shared, not cloned.
impl<E> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            version: self.version.clone(),
            environment: self.environment.clone(),
            pipeline: Arc::clone(&self.pipeline),
            metrics: Arc::clone(&self.metrics),
            started_at: self.started_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
///
/// The returned router is ready to be served on the configured API port.
pub fn create_router<E>(state: AppState<E>) -> Router
where
    E: AuthorityEndpoint + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler::<E>))
        .route(
            "/emissions",
            get(list_emissions_handler::<E>).post(submit_emission_handler::<E>),
        )
        .route("/emissions/:access_key", get(emission_record_handler::<E>))
        .route(
            "/emissions/:access_key/resume",
            post(resume_emission_handler::<E>),
        )
        .route(
            "/emissions/:access_key/document",
            get(final_document_handler::<E>),
        )
        .route("/render", post(render_sheet_handler::<E>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Server software version.
    pub version: String,
    /// Environment label.
    pub environment: String,
    /// The configured issuer tax id.
    pub issuer_tax_id: String,
    /// Effective authority submission endpoint.
    pub submit_endpoint: String,
    /// Emissions this process has tracked, any state.
    pub emissions_tracked: u64,
    /// Emissions that reached the authorized state.
    pub emissions_authorized: u64,
    /// Emissions parked in the authority's queue.
    pub emissions_pending: u64,
    /// Seconds since the server started.
    pub uptime_seconds: i64,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Response payload for a concluded emission (`POST /emissions` and
/// `POST /emissions/:access_key/resume`).
#[derive(Debug, Serialize, Deserialize)]
pub struct EmissionResponse {
    /// The document's 44-digit access key.
    pub access_key: String,
    /// Terminal record state, always "authorized" here.
    pub state: String,
    /// The authority's protocol number.
    pub protocol_number: Option<String>,
    /// The authority's status code (e.g. "100").
    pub status_code: Option<String>,
    /// The authority's status message.
    pub message: Option<String>,
    /// blake3 of the final XML, hex.
    pub fingerprint: String,
    /// The merged final document, byte-preserving.
    pub xml: String,
}

impl EmissionResponse {
    fn from_outcome(outcome: &EmissionOutcome) -> Self {
        Self {
            access_key: outcome.record.access_key.as_str().to_string(),
            state: outcome.record.state.to_string(),
            protocol_number: outcome.record.protocol_number.clone(),
            status_code: outcome.record.status_code.clone(),
            message: outcome.record.message.clone(),
            fingerprint: outcome.final_document.fingerprint.clone(),
            xml: outcome.final_document.xml.clone(),
        }
    }
}

/// 202 body for an emission still sitting in the authority's queue after
/// the polling window closed. The caller resumes it by access key.
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingResponse {
    pub access_key: String,
    pub state: String,
    pub receipt: Option<String>,
    pub error: String,
}

/// Error body carrying an authority ruling (rejection or denial) verbatim.
#[derive(Debug, Serialize, Deserialize)]
pub struct RulingResponse {
    pub error: String,
    pub code: String,
    pub message: String,
}

/// 400 body enumerating every rejected payload field.
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub error: String,
    pub problems: Vec<String>,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the server is alive.
///
/// This is the liveness probe for orchestrators (k8s, systemd, etc.).
/// It intentionally does not touch the pipeline or the authority; that
/// belongs in `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — returns an emitter status summary.
///
/// Counts come from the pipeline's record registry, so they are ground
/// truth for this process rather than a metrics-side echo.
async fn status_handler<E>(State(state): State<AppState<E>>) -> impl IntoResponse
where
    E: AuthorityEndpoint + 'static,
{
    let records = state.pipeline.records();
    let authorized = records
        .iter()
        .filter(|r| r.state == EmissionState::Authorized)
        .count() as u64;
    let pending = records
        .iter()
        .filter(|r| r.state == EmissionState::Queued)
        .count() as u64;

    let resp = StatusResponse {
        version: state.version.clone(),
        environment: state.environment.clone(),
        issuer_tax_id: state.pipeline.config().issuer_tax_id.clone(),
        submit_endpoint: state.pipeline.config().submit_endpoint(),
        emissions_tracked: records.len() as u64,
        emissions_authorized: authorized,
        emissions_pending: pending,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        timestamp: Utc::now().to_rfc3339(),
    };
    Json(resp)
}

/// `GET /emissions` — returns every tracked emission record, newest first.
async fn list_emissions_handler<E>(State(state): State<AppState<E>>) -> impl IntoResponse
where
    E: AuthorityEndpoint + 'static,
{
    Json(state.pipeline.records())
}

/// `POST /emissions` — runs the full pipeline for a submitted payload.
///
/// Returns 201 with the merged final document when the authority
/// authorizes it. Failures keep their class: invalid payloads are 400,
/// authority rejections 422, denials 403, a closed polling window 202
/// (the emission stays resumable), transport trouble 502/504.
async fn submit_emission_handler<E>(
    State(state): State<AppState<E>>,
    Json(payload): Json<InvoicePayload>,
) -> Response
where
    E: AuthorityEndpoint + 'static,
{
    state.metrics.emissions_started_total.inc();
    state.metrics.emissions_in_flight.inc();
    let started = std::time::Instant::now();
    let result = state.pipeline.emit(&payload, None).await;
    state.metrics.emissions_in_flight.dec();
    state
        .metrics
        .emission_duration_seconds
        .observe(started.elapsed().as_secs_f64());

    match result {
        Ok(outcome) => {
            state.metrics.emissions_authorized_total.inc();
            (
                StatusCode::CREATED,
                Json(EmissionResponse::from_outcome(&outcome)),
            )
                .into_response()
        }
        Err(err) => {
            // A closed polling window leaves the emission parked; recompute
            // its access key so the caller knows what to resume.
            let parked_key = match &err {
                EmissionError::Reconcile(ReconcileError::PendingTimeout { .. }) => state
                    .pipeline
                    .build_draft(&payload)
                    .ok()
                    .map(|draft| draft.access_key.as_str().to_string()),
                _ => None,
            };
            failure_response(&state, parked_key, err)
        }
    }
}

/// `GET /emissions/:access_key` — returns the tracked record for a key.
///
/// 404 when this process has never seen the key.
async fn emission_record_handler<E>(
    Path(access_key): Path<String>,
    State(state): State<AppState<E>>,
) -> Response
where
    E: AuthorityEndpoint + 'static,
{
    match state.pipeline.record(&access_key) {
        Some(record) => (StatusCode::OK, Json(record)).into_response(),
        None => {
            let err = ErrorResponse {
                error: format!("no emission tracked for access key {}", access_key),
            };
            (StatusCode::NOT_FOUND, Json(err)).into_response()
        }
    }
}

/// `POST /emissions/:access_key/resume` — polls the authority again for a
/// document that timed out in the queue, and concludes it if a terminal
/// protocol is now available.
async fn resume_emission_handler<E>(
    Path(access_key): Path<String>,
    State(state): State<AppState<E>>,
) -> Response
where
    E: AuthorityEndpoint + 'static,
{
    state.metrics.emissions_in_flight.inc();
    let result = state.pipeline.resume(&access_key, None).await;
    state.metrics.emissions_in_flight.dec();

    match result {
        Ok(outcome) => {
            state.metrics.emissions_authorized_total.inc();
            (
                StatusCode::OK,
                Json(EmissionResponse::from_outcome(&outcome)),
            )
                .into_response()
        }
        Err(err) => failure_response(&state, Some(access_key), err),
    }
}

/// `GET /emissions/:access_key/document` — returns the merged final XML.
///
/// Only authorized emissions have one; anything else is 404.
async fn final_document_handler<E>(
    Path(access_key): Path<String>,
    State(state): State<AppState<E>>,
) -> Response
where
    E: AuthorityEndpoint + 'static,
{
    match state.pipeline.final_document(&access_key) {
        Some(final_document) => (
            StatusCode::OK,
            [("content-type", "application/xml")],
            final_document.xml,
        )
            .into_response(),
        None => {
            let err = ErrorResponse {
                error: format!("no final document for access key {}", access_key),
            };
            (StatusCode::NOT_FOUND, Json(err)).into_response()
        }
    }
}

/// `POST /render` — renders a final or signed document XML to its sheet.
///
/// The request body is the raw XML. Responds with the PDF bytes inline;
/// input that cannot be read as a document is 400, a renderer failure
/// that survives its internal retry is 500.
async fn render_sheet_handler<E>(State(state): State<AppState<E>>, body: String) -> Response
where
    E: AuthorityEndpoint + 'static,
{
    match render_document(&body) {
        Ok(pdf) => {
            state.metrics.sheets_rendered_total.inc();
            (
                StatusCode::OK,
                [
                    ("content-type", "application/pdf"),
                    ("content-disposition", "inline; filename=\"document.pdf\""),
                ],
                pdf,
            )
                .into_response()
        }
        Err(err @ RenderError::MalformedInput { .. }) => {
            let resp = ErrorResponse {
                error: err.to_string(),
            };
            (StatusCode::BAD_REQUEST, Json(resp)).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "sheet rendering failed");
            let resp = ErrorResponse {
                error: err.to_string(),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(resp)).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Error Mapping
// ---------------------------------------------------------------------------

/// Maps an [`EmissionError`] onto a response without collapsing the
/// failure classes into one generic 500. "Fix your payload", "the
/// authority said no", and "try again later" stay distinguishable.
fn failure_response<E>(
    state: &AppState<E>,
    parked_key: Option<String>,
    err: EmissionError,
) -> Response
where
    E: AuthorityEndpoint + 'static,
{
    match err {
        EmissionError::Validation(e) => {
            let resp = ValidationResponse {
                error: "payload failed validation".into(),
                problems: e.problems.iter().map(|p| p.to_string()).collect(),
            };
            (StatusCode::BAD_REQUEST, Json(resp)).into_response()
        }
        EmissionError::Reconcile(ReconcileError::Rejected { code, message }) => {
            state.metrics.emissions_rejected_total.inc();
            let resp = RulingResponse {
                error: "authority rejected the document".into(),
                code,
                message,
            };
            (StatusCode::UNPROCESSABLE_ENTITY, Json(resp)).into_response()
        }
        EmissionError::Reconcile(ReconcileError::Denied { code, message }) => {
            state.metrics.emissions_denied_total.inc();
            let resp = RulingResponse {
                error: "authority denied the document".into(),
                code,
                message,
            };
            (StatusCode::FORBIDDEN, Json(resp)).into_response()
        }
        EmissionError::Reconcile(ReconcileError::PendingTimeout { .. }) => {
            let record = parked_key
                .as_deref()
                .and_then(|key| state.pipeline.record(key));
            let resp = PendingResponse {
                access_key: parked_key.unwrap_or_default(),
                state: record
                    .as_ref()
                    .map(|r| r.state.to_string())
                    .unwrap_or_else(|| "queued".into()),
                receipt: record.and_then(|r| r.receipt),
                error: "authorization still pending, resume later".into(),
            };
            (StatusCode::ACCEPTED, Json(resp)).into_response()
        }
        EmissionError::Transport(e) => transport_response(e),
        EmissionError::Reconcile(ReconcileError::Transport(e)) => transport_response(e),
        EmissionError::Reconcile(other) => {
            tracing::error!(error = %other, "reconciliation failed");
            let resp = ErrorResponse {
                error: other.to_string(),
            };
            (StatusCode::BAD_GATEWAY, Json(resp)).into_response()
        }
        EmissionError::UnknownDocument(key) => {
            let resp = ErrorResponse {
                error: format!("no emission tracked for access key {}", key),
            };
            (StatusCode::NOT_FOUND, Json(resp)).into_response()
        }
        other => {
            // Signing trouble and state machine guards are operator-side
            // problems, not the caller's.
            tracing::error!(error = %other, "emission failed server-side");
            let resp = ErrorResponse {
                error: other.to_string(),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(resp)).into_response()
        }
    }
}

/// The deadline is the caller's budget running out; everything else in
/// the transport is the authority being unreachable or broken.
fn transport_response(err: TransportError) -> Response {
    let status = match err {
        TransportError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    let resp = ErrorResponse {
        error: err.to_string(),
    };
    (status, Json(resp)).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
