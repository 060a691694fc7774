//! HTTP Module
//!
//! Minimal HTTP/1.1 handling for the JSON front end.
//!
//! ## Routes
//! - `GET /`            banner
//! - `POST /set`        `{"key": "...", "value": <any JSON>}`
//! - `GET /get/:key`    `{"key": "...", "value": <JSON>}`
//! - `GET /health`      liveness check with a timestamp
//! - `GET /stats`       store statistics, key count, data size, uptime
//! - `GET /metrics`     Prometheus text exposition
//!
//! Values are stored as their JSON encoding; the store itself only sees bytes.

mod handler;
mod metrics;
mod request;
mod response;

pub use handler::{Service, BANNER};
pub use metrics::Metrics;
pub use request::{Request, RequestError, MAX_HEADER_BYTES};
pub use response::Response;
