//! # Prometheus Metrics
//!
//! Operational metrics for the emission service, scraped at the `/metrics`
//! endpoint on the dedicated metrics port.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] with the `lavra`
//! prefix so they do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the server.
///
/// Clone-friendly (prometheus handles are `Arc` internally) so it can be
/// shared across request handlers.
#[derive(Clone)]
pub struct EmitterMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Emissions accepted for processing, successful or not.
    pub emissions_started_total: IntCounter,
    /// Emissions that reached an authorized final document.
    pub emissions_authorized_total: IntCounter,
    /// Emissions the authority rejected. The numbering was released.
    pub emissions_rejected_total: IntCounter,
    /// Emissions the authority denied. The numbering was consumed.
    pub emissions_denied_total: IntCounter,
    /// Emissions currently in flight, submission through protocol merge.
    pub emissions_in_flight: IntGauge,
    /// Document sheets rendered to PDF.
    pub sheets_rendered_total: IntCounter,
    /// End-to-end emission latency in seconds, submission through merge.
    pub emission_duration_seconds: Histogram,
}

impl EmitterMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("lavra".into()), None)
            .expect("failed to create prometheus registry");

        let emissions_started_total = IntCounter::new(
            "emissions_started_total",
            "Total number of emissions accepted for processing",
        )
        .expect("metric creation");
        registry
            .register(Box::new(emissions_started_total.clone()))
            .expect("metric registration");

        let emissions_authorized_total = IntCounter::new(
            "emissions_authorized_total",
            "Total number of emissions that reached an authorized final document",
        )
        .expect("metric creation");
        registry
            .register(Box::new(emissions_authorized_total.clone()))
            .expect("metric registration");

        let emissions_rejected_total = IntCounter::new(
            "emissions_rejected_total",
            "Total number of emissions the authority rejected",
        )
        .expect("metric creation");
        registry
            .register(Box::new(emissions_rejected_total.clone()))
            .expect("metric registration");

        let emissions_denied_total = IntCounter::new(
            "emissions_denied_total",
            "Total number of emissions the authority denied",
        )
        .expect("metric creation");
        registry
            .register(Box::new(emissions_denied_total.clone()))
            .expect("metric registration");

        let emissions_in_flight = IntGauge::new(
            "emissions_in_flight",
            "Number of emissions currently between submission and protocol merge",
        )
        .expect("metric creation");
        registry
            .register(Box::new(emissions_in_flight.clone()))
            .expect("metric registration");

        let sheets_rendered_total = IntCounter::new(
            "sheets_rendered_total",
            "Total number of document sheets rendered to PDF",
        )
        .expect("metric creation");
        registry
            .register(Box::new(sheets_rendered_total.clone()))
            .expect("metric registration");

        // Emission latency is dominated by the authority round trips and
        // the polling interval, so the buckets run long.
        let emission_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "emission_duration_seconds",
                "End-to-end emission latency in seconds",
            )
            .buckets(vec![
                0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(emission_duration_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            emissions_started_total,
            emissions_authorized_total,
            emissions_rejected_total,
            emissions_denied_total,
            emissions_in_flight,
            sheets_rendered_total,
            emission_duration_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<EmitterMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
