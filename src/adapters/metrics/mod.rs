//! Metrics and Monitoring Adapters
//!
//! Prometheus gauges and the axum server exposing /live, /ready,
//! /health and /metrics on one bind address.

pub mod health;
pub mod prometheus;

pub use health::{HealthServer, HealthState};
pub use prometheus::MetricsRegistry;
