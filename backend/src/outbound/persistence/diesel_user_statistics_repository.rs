//! PostgreSQL-backed `UserStatisticsRepository` with keyed, exactly-once deltas.
//!
//! `apply_delta` runs in one database transaction: insert the
//! `(adjustment_key, user_id)` marker, seed the statistics row if missing,
//! lock it, apply the delta with the domain arithmetic and write it back.
//! A marker conflict means the delta already landed.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::domain::ports::{
    DeltaApplication, UserStatisticsRepository, UserStatisticsRepositoryError,
};
use crate::domain::{AdjustmentKey, StatisticsDelta, UserId, UserStatistics};

use super::error_mapping::{
    count_from_db, count_to_db, map_basic_diesel_error, map_basic_pool_error,
};
use super::models::{
    NewAdjustmentRow, NewUserStatisticsRow, UserStatisticsChangeset, UserStatisticsRow,
};
use super::pool::{DbPool, PoolError};
use super::schema::{reputation_adjustments, user_statistics};

/// Diesel-backed implementation of the `UserStatisticsRepository` port.
#[derive(Clone)]
pub struct DieselUserStatisticsRepository {
    pool: DbPool,
}

impl DieselUserStatisticsRepository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn map_pool_error(error: PoolError) -> UserStatisticsRepositoryError {
    map_basic_pool_error(error, UserStatisticsRepositoryError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> UserStatisticsRepositoryError {
    map_basic_diesel_error(
        error,
        UserStatisticsRepositoryError::query,
        UserStatisticsRepositoryError::connection,
    )
}

fn row_to_statistics(
    user_id: &UserId,
    row: UserStatisticsRow,
) -> Result<UserStatistics, UserStatisticsRepositoryError> {
    let count = |value| count_from_db(value).map_err(UserStatisticsRepositoryError::query);
    Ok(UserStatistics {
        user_id: user_id.clone(),
        completed_transactions: count(row.completed_transactions)?,
        cancellations: count(row.cancellations)?,
        last_minute_cancels_as_seller: count(row.last_minute_cancels_as_seller)?,
        last_minute_cancels_as_buyer: count(row.last_minute_cancels_as_buyer)?,
        rating_count: count(row.rating_count)?,
        average_rating: row.average_rating,
        trust_score: row.trust_score,
        version: row.version,
    })
}

fn statistics_to_changeset(
    stats: &UserStatistics,
) -> Result<UserStatisticsChangeset, UserStatisticsRepositoryError> {
    let count = |value| count_to_db(value).map_err(UserStatisticsRepositoryError::query);
    Ok(UserStatisticsChangeset {
        completed_transactions: count(stats.completed_transactions)?,
        cancellations: count(stats.cancellations)?,
        last_minute_cancels_as_seller: count(stats.last_minute_cancels_as_seller)?,
        last_minute_cancels_as_buyer: count(stats.last_minute_cancels_as_buyer)?,
        rating_count: count(stats.rating_count)?,
        average_rating: stats.average_rating,
        trust_score: stats.trust_score,
        version: stats.version,
        updated_at: Utc::now(),
    })
}

/// Failure inside the delta transaction; keeps domain conversion errors
/// separate from Diesel errors so the transaction still rolls back.
#[derive(Debug)]
enum ApplyError {
    Diesel(diesel::result::Error),
    Convert(UserStatisticsRepositoryError),
}

impl From<diesel::result::Error> for ApplyError {
    fn from(error: diesel::result::Error) -> Self {
        Self::Diesel(error)
    }
}

#[async_trait]
impl UserStatisticsRepository for DieselUserStatisticsRepository {
    async fn load(
        &self,
        user_id: &UserId,
    ) -> Result<UserStatistics, UserStatisticsRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let row: Option<UserStatisticsRow> = user_statistics::table
            .filter(user_statistics::user_id.eq(user_id.as_uuid()))
            .select(UserStatisticsRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;
        match row {
            Some(row) => row_to_statistics(user_id, row),
            None => Ok(UserStatistics::new(user_id.clone())),
        }
    }

    async fn apply_delta(
        &self,
        user_id: &UserId,
        delta: &StatisticsDelta,
        key: &AdjustmentKey,
    ) -> Result<DeltaApplication, UserStatisticsRepositoryError> {
        use diesel_async::AsyncConnection as _;
        use diesel_async::scoped_futures::ScopedFutureExt as _;

        let marker = NewAdjustmentRow {
            adjustment_key: key.to_string(),
            user_id: *user_id.as_uuid(),
            delta: serde_json::to_value(delta).map_err(|err| {
                UserStatisticsRepositoryError::query(format!("encode delta: {err}"))
            })?,
        };
        let delta = *delta;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let result = conn
            .transaction::<_, ApplyError, _>(|conn| {
                async move {
                    let inserted = diesel::insert_into(reputation_adjustments::table)
                        .values(&marker)
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;
                    if inserted == 0 {
                        return Ok(DeltaApplication::Duplicate);
                    }

                    diesel::insert_into(user_statistics::table)
                        .values(&NewUserStatisticsRow {
                            user_id: marker.user_id,
                        })
                        .on_conflict_do_nothing()
                        .execute(conn)
                        .await?;

                    let row: UserStatisticsRow = user_statistics::table
                        .filter(user_statistics::user_id.eq(marker.user_id))
                        .select(UserStatisticsRow::as_select())
                        .for_update()
                        .first(conn)
                        .await?;

                    let mut stats =
                        row_to_statistics(user_id, row).map_err(ApplyError::Convert)?;
                    stats.apply(&delta);
                    let update = statistics_to_changeset(&stats).map_err(ApplyError::Convert)?;

                    diesel::update(user_statistics::table)
                        .filter(user_statistics::user_id.eq(marker.user_id))
                        .set(&update)
                        .execute(conn)
                        .await?;

                    Ok(DeltaApplication::Applied(stats))
                }
                .scope_boxed()
            })
            .await;

        result.map_err(|error| match error {
            ApplyError::Diesel(error) => map_diesel_error(error),
            ApplyError::Convert(error) => error,
        })
    }
}
