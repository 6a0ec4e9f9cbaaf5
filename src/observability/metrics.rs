//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Keep in-process request statistics for the JSON metrics endpoint
//! - Record Prometheus metrics through the `metrics` facade
//! - Expose a Prometheus scrape endpoint when enabled
//!
//! # Metrics
//! - `defense_requests_total` (counter): requests by method, status
//! - `defense_request_duration_seconds` (histogram): latency distribution
//! - `defense_rejections_total` (counter): rejections by reason code
//! - `defense_truncated_fields_total` (counter): long-text truncations by route
//! - `defense_store_failures_total` (counter): store errors by caller
//! - `defense_secret_events_total` (counter): rotations and retirements
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Facade calls are no-ops until an exporter is installed

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

use crate::error::ReasonCode;

const CLASSES: [&str; 5] = ["1xx", "2xx", "3xx", "4xx", "5xx"];

/// Process-wide request statistics behind `GET /metrics`.
#[derive(Debug)]
pub struct RequestStats {
    started: Instant,
    total: AtomicU64,
    by_class: [AtomicU64; 5],
    rejections: DashMap<&'static str, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub responses_by_class: BTreeMap<&'static str, u64>,
    pub rejections: BTreeMap<&'static str, u64>,
    pub uptime_secs: u64,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total: AtomicU64::new(0),
            by_class: Default::default(),
            rejections: DashMap::new(),
        }
    }

    /// Count one finished response.
    pub fn record(&self, status: u16, rejection: Option<ReasonCode>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if let Some(slot) = (status / 100).checked_sub(1).and_then(|i| self.by_class.get(i as usize)) {
            slot.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(code) = rejection {
            *self.rejections.entry(code.as_str()).or_insert(0) += 1;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total.load(Ordering::Relaxed),
            responses_by_class: CLASSES
                .iter()
                .zip(&self.by_class)
                .map(|(name, n)| (*name, n.load(Ordering::Relaxed)))
                .collect(),
            rejections: self.rejections.iter().map(|e| (*e.key(), *e.value())).collect(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the Prometheus recorder with its own HTTP listener.
pub fn init_prometheus(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, started: Instant) {
    metrics::counter!(
        "defense_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("defense_request_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_rejection(code: ReasonCode) {
    metrics::counter!("defense_rejections_total", "code" => code.as_str()).increment(1);
}

pub fn record_truncation(route: &str, count: usize) {
    metrics::counter!("defense_truncated_fields_total", "route" => route.to_string()).increment(count as u64);
}

pub fn record_store_failure(caller: &'static str) {
    metrics::counter!("defense_store_failures_total", "caller" => caller).increment(1);
}

pub fn record_secret_event(event: &'static str) {
    metrics::counter!("defense_secret_events_total", "event" => event).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_status_class() {
        let stats = RequestStats::new();
        stats.record(200, None);
        stats.record(204, None);
        stats.record(429, Some(ReasonCode::RateLimited));
        stats.record(401, Some(ReasonCode::TokenExpired));
        stats.record(502, None);

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 5);
        assert_eq!(snap.responses_by_class["2xx"], 2);
        assert_eq!(snap.responses_by_class["4xx"], 2);
        assert_eq!(snap.responses_by_class["5xx"], 1);
        assert_eq!(snap.responses_by_class["3xx"], 0);
        assert_eq!(snap.rejections["RATE_LIMITED"], 1);
        assert_eq!(snap.rejections["TOKEN_EXPIRED"], 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = RequestStats::new();
        stats.record(200, None);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["total_requests"], 1);
        assert_eq!(json["responses_by_class"]["2xx"], 1);
        assert!(json["uptime_secs"].is_u64());
    }
}
