//! Prometheus metrics for the HTTP front end
//!
//! ## Exported Series
//! - `lodekv_requests_total{method, endpoint}`   requests served
//! - `lodekv_request_duration_seconds`           request latency histogram
//! - `lodekv_database_size_bytes`                live key + value bytes
//! - `lodekv_keys`                               live keys
//! - `process_*` (Linux)                         resident memory, CPU, fds

use std::time::Duration;

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::Result;

/// Request and database metrics, in a registry of their own
pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    latency: Histogram,
    database_size: IntGauge,
    keys: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("lodekv_requests_total", "Total requests"),
            &["method", "endpoint"],
        )?;
        let latency = Histogram::with_opts(HistogramOpts::new(
            "lodekv_request_duration_seconds",
            "Request latency",
        ))?;
        let database_size = IntGauge::new("lodekv_database_size_bytes", "Database size in bytes")?;
        let keys = IntGauge::new("lodekv_keys", "Number of live keys")?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(database_size.clone()))?;
        registry.register(Box::new(keys.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))?;

        Ok(Self {
            registry,
            requests,
            latency,
            database_size,
            keys,
        })
    }

    /// Count one served request
    pub fn observe(&self, method: &str, endpoint: &str, elapsed: Duration) {
        self.requests.with_label_values(&[method, endpoint]).inc();
        self.latency.observe(elapsed.as_secs_f64());
    }

    /// Requests served so far for a method/endpoint pair
    pub fn request_count(&self, method: &str, endpoint: &str) -> u64 {
        self.requests.with_label_values(&[method, endpoint]).get()
    }

    pub fn set_database_size(&self, keys: u64, bytes: u64) {
        self.keys.set(keys as i64);
        self.database_size.set(bytes as i64);
    }

    /// Text exposition of every registered series
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut out)?;
        Ok(out)
    }
}
