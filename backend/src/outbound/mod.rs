//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **memory**: single-process store for every repository port
//! - **persistence**: PostgreSQL-backed repositories using Diesel ORM
//! - **payments**: HTTP payment provider client
//! - **notifications**: log and broadcast event sinks
//! - **metrics**: Prometheus-backed counters (feature-gated)
//!
//! Adapters translate between domain types and infrastructure
//! representations. They contain no business logic.

pub mod memory;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod notifications;
pub mod payments;
pub mod persistence;
