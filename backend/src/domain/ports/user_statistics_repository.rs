//! Port for per-user reputation statistics.

use async_trait::async_trait;

use crate::domain::{AdjustmentKey, StatisticsDelta, UserId, UserStatistics};

use super::define_port_error;

define_port_error! {
    /// Errors raised by statistics repository adapters.
    pub enum UserStatisticsRepositoryError {
        /// Repository connection could not be established.
        Connection { message: String } =>
            "user statistics connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } =>
            "user statistics query failed: {message}",
    }
}

/// Result of applying a keyed delta.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaApplication {
    /// The delta was applied; carries the updated snapshot.
    Applied(UserStatistics),
    /// The key had already been applied for this user; nothing changed.
    Duplicate,
}

/// Store for [`UserStatistics`].
///
/// `apply_delta` must record the `(key, user)` marker and the increments in
/// one atomic step.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStatisticsRepository: Send + Sync {
    /// Current snapshot; users with no history get [`UserStatistics::new`].
    async fn load(&self, user_id: &UserId)
    -> Result<UserStatistics, UserStatisticsRepositoryError>;

    /// Apply `delta` once per `(key, user_id)`.
    async fn apply_delta(
        &self,
        user_id: &UserId,
        delta: &StatisticsDelta,
        key: &AdjustmentKey,
    ) -> Result<DeltaApplication, UserStatisticsRepositoryError>;
}
