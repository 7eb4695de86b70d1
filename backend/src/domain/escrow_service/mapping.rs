//! Port error to domain error mapping.

use serde_json::json;

use crate::domain::Error;
use crate::domain::ports::{
    ReviewRepositoryError, TransactionRepositoryError, UserStatisticsRepositoryError,
};

pub(super) fn map_transaction_repository_error(error: TransactionRepositoryError) -> Error {
    match error {
        TransactionRepositoryError::Connection { message } => {
            Error::service_unavailable(format!("transaction store unavailable: {message}"))
        }
        TransactionRepositoryError::Query { message } => {
            Error::internal(format!("transaction store error: {message}"))
        }
        TransactionRepositoryError::VersionConflict { expected } => Error::version_conflict(
            "transaction was modified concurrently; retry budget exhausted",
        )
        .with_details(json!({ "expectedVersion": expected })),
        TransactionRepositoryError::Duplicate { transaction_id } => Error::internal(format!(
            "transaction {transaction_id} already exists"
        )),
    }
}

pub(super) fn map_statistics_repository_error(error: UserStatisticsRepositoryError) -> Error {
    match error {
        UserStatisticsRepositoryError::Connection { message } => {
            Error::service_unavailable(format!("statistics store unavailable: {message}"))
        }
        UserStatisticsRepositoryError::Query { message } => {
            Error::internal(format!("statistics store error: {message}"))
        }
    }
}

pub(super) fn map_review_repository_error(error: ReviewRepositoryError) -> Error {
    match error {
        ReviewRepositoryError::DuplicateReview {
            transaction_id,
            rater_id,
        } => Error::invalid_request("this transaction has already been reviewed by the rater")
            .with_details(json!({ "transactionId": transaction_id, "raterId": rater_id })),
        ReviewRepositoryError::Connection { message } => {
            Error::service_unavailable(format!("review store unavailable: {message}"))
        }
        ReviewRepositoryError::Query { message } => {
            Error::internal(format!("review store error: {message}"))
        }
    }
}
