//! Outbound adapters for metrics exporting.
//!
//! Prometheus-backed implementations of the escrow metrics port, gated behind
//! the `metrics` feature.

mod prometheus_escrow;

pub use prometheus_escrow::PrometheusEscrowMetrics;
