//! Request metrics.
//!
//! # Metrics
//! - `total_requests_received` (counter)
//! - `total_responses_sent` (counter)
//! - `total_processing_time_μs` (counter)
//! - `total_responses_sent_by_status` (counter per status code)
//!
//! The same events are mirrored to the `metrics` facade as
//! `http_requests_total{status}` and `http_request_duration_seconds`, so a
//! Prometheus exporter can scrape them when one is installed.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use serde::Serialize;

use crate::http::server::AppState;

/// Process-wide request counters. All updates are lock-free.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    requests_received: AtomicU64,
    responses_sent: AtomicU64,
    processing_time_us: AtomicU64,
    responses_by_status: DashMap<u16, AtomicU64>,
}

/// Point-in-time copy of [`RequestMetrics`], as served by `/debug/vars`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests_received: u64,
    pub total_responses_sent: u64,
    #[serde(rename = "total_processing_time_μs")]
    pub total_processing_time_us: u64,
    pub total_responses_sent_by_status: BTreeMap<u16, u64>,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_sent(&self, status: StatusCode, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);

        self.responses_sent.fetch_add(1, Ordering::Relaxed);
        self.processing_time_us.fetch_add(micros, Ordering::Relaxed);
        self.responses_by_status
            .entry(status.as_u16())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);

        ::metrics::counter!("http_requests_total", "status" => status.as_u16().to_string())
            .increment(1);
        ::metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests_received: self.requests_received.load(Ordering::Relaxed),
            total_responses_sent: self.responses_sent.load(Ordering::Relaxed),
            total_processing_time_us: self.processing_time_us.load(Ordering::Relaxed),
            total_responses_sent_by_status: self
                .responses_by_status
                .iter()
                .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
pub fn init_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Counts every request and the response it produced.
pub async fn record_metrics(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    state.metrics.request_received();
    let start = Instant::now();

    let response = next.run(request).await;

    state.metrics.response_sent(response.status(), start.elapsed());
    response
}
