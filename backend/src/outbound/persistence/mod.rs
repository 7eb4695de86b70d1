//! PostgreSQL persistence adapters using Diesel ORM.
//!
//! Concrete implementations of the escrow repository ports backed by
//! PostgreSQL via Diesel, with async support through `diesel-async` and
//! `bb8` connection pooling.
//!
//! - **Thin adapters**: repositories only translate between rows and domain
//!   types. State legality and reputation arithmetic stay in the domain.
//! - **Internal models**: row structs (`models.rs`) and table definitions
//!   (`schema.rs`) never leave this module.
//! - **Optimistic writes**: transaction saves filter on the stored version
//!   and report a conflict when no row matched.
//!
//! # Example
//!
//! ```ignore
//! use escrow_backend::outbound::persistence::{DbPool, PoolConfig, DieselTransactionRepository};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/escrow")).await?;
//! let transactions = DieselTransactionRepository::new(pool);
//! ```

mod diesel_review_repository;
mod diesel_transaction_repository;
mod diesel_user_statistics_repository;
mod error_mapping;
mod migrations;
mod models;
mod pool;
mod schema;

pub use diesel_review_repository::DieselReviewRepository;
pub use diesel_transaction_repository::DieselTransactionRepository;
pub use diesel_user_statistics_repository::DieselUserStatisticsRepository;
pub use migrations::run_pending_migrations;
pub use pool::{DbPool, PoolConfig, PoolError};
