//! PostgreSQL-backed `ReviewRepository`.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{ReviewRepository, ReviewRepositoryError};
use crate::domain::{Rating, Review, TransactionId, UserId};

use super::error_mapping::{is_unique_violation, map_basic_diesel_error, map_basic_pool_error};
use super::models::ReviewRow;
use super::pool::{DbPool, PoolError};
use super::schema::escrow_reviews;

/// Diesel-backed implementation of the `ReviewRepository` port.
#[derive(Clone)]
pub struct DieselReviewRepository {
    pool: DbPool,
}

impl DieselReviewRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> ReviewRepositoryError {
    map_basic_pool_error(error, ReviewRepositoryError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> ReviewRepositoryError {
    map_basic_diesel_error(
        error,
        ReviewRepositoryError::query,
        ReviewRepositoryError::connection,
    )
}

fn review_to_row(review: &Review) -> ReviewRow {
    ReviewRow {
        transaction_id: *review.transaction_id.as_uuid(),
        rater_id: *review.rater_id.as_uuid(),
        rated_id: *review.rated_id.as_uuid(),
        rating: i16::from(review.rating.value()),
        comment: review.comment.clone(),
        created_at: review.created_at,
    }
}

fn row_to_review(row: ReviewRow) -> Result<Review, ReviewRepositoryError> {
    let rating = Rating::new(i64::from(row.rating))
        .map_err(|err| ReviewRepositoryError::query(err.to_string()))?;
    Ok(Review {
        transaction_id: TransactionId::new(row.transaction_id),
        rater_id: UserId::from(row.rater_id),
        rated_id: UserId::from(row.rated_id),
        rating,
        comment: row.comment,
        created_at: row.created_at,
    })
}

#[async_trait]
impl ReviewRepository for DieselReviewRepository {
    async fn insert(&self, review: &Review) -> Result<(), ReviewRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        diesel::insert_into(escrow_reviews::table)
            .values(&review_to_row(review))
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(|err| {
                if is_unique_violation(&err) {
                    ReviewRepositoryError::duplicate_review(
                        review.transaction_id.to_string(),
                        review.rater_id.to_string(),
                    )
                } else {
                    map_diesel_error(err)
                }
            })
    }

    async fn list_for_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<Review>, ReviewRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let rows: Vec<ReviewRow> = escrow_reviews::table
            .filter(escrow_reviews::transaction_id.eq(transaction_id.as_uuid()))
            .order(escrow_reviews::created_at.asc())
            .select(ReviewRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;
        rows.into_iter().map(row_to_review).collect()
    }
}
