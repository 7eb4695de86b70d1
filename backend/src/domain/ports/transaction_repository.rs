//! Port for escrow transaction persistence with optimistic versioning.

use async_trait::async_trait;

use crate::domain::{Transaction, TransactionId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by transaction repository adapters.
    pub enum TransactionRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } =>
            "transaction repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } =>
            "transaction repository query failed: {message}",
        /// The stored version no longer matches the caller's copy.
        VersionConflict { expected: i64 } =>
            "transaction was modified concurrently (expected version {expected})",
        /// A transaction with the same id already exists.
        Duplicate { transaction_id: String } =>
            "transaction {transaction_id} already exists",
    }
}

/// Durable storage for escrow transactions.
///
/// Writes go through [`TransactionRepository::save`], which succeeds only when
/// the stored version equals `expected_version` and returns the record with
/// its new version.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Load a transaction by id.
    async fn load(
        &self,
        id: &TransactionId,
    ) -> Result<Option<Transaction>, TransactionRepositoryError>;

    /// Insert a new transaction at version zero.
    async fn insert(&self, transaction: &Transaction) -> Result<(), TransactionRepositoryError>;

    /// Overwrite a transaction if nobody else wrote it since `expected_version`.
    async fn save(
        &self,
        transaction: &Transaction,
        expected_version: i64,
    ) -> Result<Transaction, TransactionRepositoryError>;

    /// Every non-terminal transaction, oldest first.
    async fn list_open(&self) -> Result<Vec<Transaction>, TransactionRepositoryError>;

    /// Terminal transactions whose reputation adjustments have not been stamped.
    async fn list_unsettled_terminal(
        &self,
    ) -> Result<Vec<Transaction>, TransactionRepositoryError>;
}
