//! Request routing
//!
//! Maps a parsed request onto store operations. Never fails: every outcome,
//! including storage errors, becomes a response. Every request is counted
//! and timed in the service's metrics.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

use crate::error::Result;
use crate::store::Store;

use super::metrics::Metrics;
use super::{Request, Response};

/// Body of `GET /`
pub const BANNER: &str = "LodeKV API is up and running!";

/// Key read by the health check
const HEALTH_CHECK_KEY: &[u8] = b"__lodekv_health__";

/// Endpoint label for paths that match no route
const UNMATCHED: &str = "unmatched";

/// The HTTP front end's shared state: the store, its metrics, and start time
pub struct Service {
    store: Arc<Store>,
    metrics: Metrics,
    started: Instant,
}

impl Service {
    pub fn new(store: Arc<Store>) -> Result<Self> {
        Ok(Self {
            store,
            metrics: Metrics::new()?,
            started: Instant::now(),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Route a request to its handler and record it
    pub fn handle(&self, request: &Request) -> Response {
        let start = Instant::now();
        let (endpoint, response) = self.route(request);
        self.metrics
            .observe(method_label(&request.method), endpoint, start.elapsed());
        response
    }

    fn route(&self, request: &Request) -> (&'static str, Response) {
        let method = request.method.as_str();
        let path = request.path();

        if let Some(raw_key) = path.strip_prefix("/get/") {
            let response = match method {
                "GET" => self.get(raw_key),
                _ => Response::method_not_allowed("GET"),
            };
            return ("/get", response);
        }

        match (method, path) {
            ("GET", "/") => ("/", Response::text(200, BANNER)),
            ("POST", "/set") => ("/set", self.set(&request.body)),
            ("GET", "/health") => ("/health", self.health()),
            ("GET", "/stats") => ("/stats", self.stats()),
            ("GET", "/metrics") => ("/metrics", self.render_metrics()),
            (_, "/") => ("/", Response::method_not_allowed("GET")),
            (_, "/health") => ("/health", Response::method_not_allowed("GET")),
            (_, "/stats") => ("/stats", Response::method_not_allowed("GET")),
            (_, "/metrics") => ("/metrics", Response::method_not_allowed("GET")),
            (_, "/set") => ("/set", Response::method_not_allowed("POST")),
            _ => (UNMATCHED, Response::not_found()),
        }
    }

    fn set(&self, body: &[u8]) -> Response {
        let payload: Value = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => return Response::error(400, &format!("Invalid JSON body: {}", e)),
        };

        let key = match payload.get("key") {
            Some(Value::String(key)) if !key.is_empty() => key.clone(),
            _ => return Response::error(400, "Field \"key\" must be a non-empty string"),
        };
        let value = match payload.get("value") {
            Some(value) => value.clone(),
            None => return Response::error(400, "Field \"value\" is required"),
        };

        match self.store.put(key.as_bytes(), value.to_string().as_bytes()) {
            Ok(()) => Response::json(200, &json!({ "status": "success", "key": key, "value": value })),
            Err(e) => {
                tracing::error!(key = %key, error = %e, "write failed");
                Response::error(500, "Error writing to DB")
            }
        }
    }

    fn get(&self, raw_key: &str) -> Response {
        let key = match percent_decode(raw_key) {
            Some(key) if !key.is_empty() => key,
            _ => return Response::error(400, "Invalid key"),
        };
        let display_key = String::from_utf8_lossy(&key).into_owned();

        match self.store.get(&key) {
            Ok(Some(bytes)) => {
                let value = serde_json::from_slice::<Value>(&bytes)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
                Response::json(200, &json!({ "key": display_key, "value": value }))
            }
            Ok(None) => Response::error(404, "Key not found"),
            Err(e) => {
                tracing::error!(key = %display_key, error = %e, "read failed");
                Response::error(500, "Error reading from DB")
            }
        }
    }

    fn health(&self) -> Response {
        match self.store.get(HEALTH_CHECK_KEY) {
            Ok(_) => Response::json(200, &json!({ "status": "healthy", "timestamp": unix_now() })),
            Err(e) => {
                tracing::warn!(error = %e, "health check failed");
                Response::json(
                    503,
                    &json!({ "status": "unhealthy", "error": e.to_string(), "timestamp": unix_now() }),
                )
            }
        }
    }

    fn stats(&self) -> Response {
        let (key_count, size_bytes) = match self.scan_size() {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(error = %e, "stats scan failed");
                return Response::error(500, "Error reading from DB");
            }
        };

        let mut stats = match serde_json::to_value(self.store.stats()) {
            Ok(stats) => stats,
            Err(e) => return Response::error(500, &e.to_string()),
        };
        if let Value::Object(fields) = &mut stats {
            fields.insert("key_count".into(), json!(key_count));
            fields.insert("database_size_bytes".into(), json!(size_bytes));
            fields.insert("uptime_seconds".into(), json!(self.started.elapsed().as_secs_f64()));
        }
        Response::json(200, &stats)
    }

    fn render_metrics(&self) -> Response {
        // A failed scan leaves the gauges at their last value
        if let Err(e) = self.scan_size() {
            tracing::warn!(error = %e, "metrics scan failed");
        }
        match self.metrics.render() {
            Ok(body) => Response::raw(200, prometheus::TEXT_FORMAT, body),
            Err(e) => Response::error(500, &e.to_string()),
        }
    }

    /// Live key count and key + value bytes; refreshes the size gauges
    fn scan_size(&self) -> Result<(u64, u64)> {
        let mut keys = 0u64;
        let mut bytes = 0u64;
        for entry in self.store.iterate(None, None)? {
            let (key, value) = entry?;
            keys += 1;
            bytes += (key.len() + value.len()) as u64;
        }
        self.metrics.set_database_size(keys, bytes);
        Ok((keys, bytes))
    }
}

/// Bounded label set for the request counter
fn method_label(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "HEAD" => "HEAD",
        "PATCH" => "PATCH",
        "OPTIONS" => "OPTIONS",
        _ => "OTHER",
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Decode `%XX` escapes in a path segment; `None` on a bad escape
fn percent_decode(raw: &str) -> Option<Vec<u8>> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Some(out)
}
