//! Test utilities for the backend crate.
//!
//! Shared by unit tests (in `src/`) and integration tests (in `tests/`).
//! Compiled under `cfg(test)` and behind the `test-support` feature.

pub mod escrow;
