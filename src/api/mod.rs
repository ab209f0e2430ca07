//! HTTP API Module
//!
//! Serves the metrics registry for scraping, plus a health probe.

mod http;

pub use http::MetricsServer;
