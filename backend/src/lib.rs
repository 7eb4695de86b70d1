//! Escrow backend library modules.
//!
//! The domain owns the transaction state machine, cancellation timing and
//! reputation rules; `outbound` holds the storage, payment, notification
//! and metrics adapters the worker binary wires together.

pub mod config;
pub mod domain;
pub mod outbound;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
