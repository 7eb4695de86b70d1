//! Port for transaction reviews.

use async_trait::async_trait;

use crate::domain::{Review, TransactionId};

use super::define_port_error;

define_port_error! {
    /// Errors raised by review repository adapters.
    pub enum ReviewRepositoryError {
        /// The rater already reviewed this transaction.
        DuplicateReview { transaction_id: String, rater_id: String } =>
            "user {rater_id} already reviewed transaction {transaction_id}",
        /// Repository connection could not be established.
        Connection { message: String } =>
            "review repository connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } =>
            "review repository query failed: {message}",
    }
}

/// Review storage, unique per `(transaction_id, rater_id)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    /// Store a review or fail with `DuplicateReview`.
    async fn insert(&self, review: &Review) -> Result<(), ReviewRepositoryError>;

    /// Reviews left on a transaction, oldest first.
    async fn list_for_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<Review>, ReviewRepositoryError>;
}
