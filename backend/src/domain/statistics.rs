//! Per-user reputation aggregates.
//!
//! Statistics only change through [`StatisticsDelta`] values. Adapters apply
//! a delta atomically together with its idempotency marker; the in-memory
//! arithmetic lives in [`UserStatistics::apply`] so every adapter agrees on
//! the running average and trust score bounds.

use serde::{Deserialize, Serialize};

use super::{Rating, UserId};

/// Lowest possible trust score.
pub const TRUST_SCORE_MIN: i32 = 0;
/// Highest possible trust score.
pub const TRUST_SCORE_MAX: i32 = 100;
/// Trust score of a user with no history.
pub const TRUST_SCORE_INITIAL: i32 = 50;

/// Snapshot of one user's reputation counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatistics {
    /// Owner of the counters.
    pub user_id: UserId,
    /// Transactions completed as either party.
    pub completed_transactions: u32,
    /// Cancellations charged to this user.
    pub cancellations: u32,
    /// Last-minute cancellations made while selling.
    pub last_minute_cancels_as_seller: u32,
    /// Last-minute cancellations made while buying.
    pub last_minute_cancels_as_buyer: u32,
    /// Reviews received.
    pub rating_count: u32,
    /// Mean of received ratings; `0.0` before the first review.
    pub average_rating: f64,
    /// Bounded to `0..=100`.
    pub trust_score: i32,
    /// Bumped on every applied delta.
    pub version: i64,
}

impl UserStatistics {
    /// Zero snapshot for a user with no recorded activity.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            completed_transactions: 0,
            cancellations: 0,
            last_minute_cancels_as_seller: 0,
            last_minute_cancels_as_buyer: 0,
            rating_count: 0,
            average_rating: 0.0,
            trust_score: TRUST_SCORE_INITIAL,
            version: 0,
        }
    }

    /// Apply a delta in place.
    ///
    /// The average uses the incremental form
    /// `avg + (rating - avg) / count`, and the trust score saturates at its
    /// bounds.
    ///
    /// # Examples
    /// ```
    /// use escrow_backend::domain::{Rating, StatisticsDelta, UserId, UserStatistics};
    ///
    /// let mut stats = UserStatistics::new(UserId::random());
    /// for value in [8, 10, 6] {
    ///     stats.apply(&StatisticsDelta::rating(Rating::new(value).unwrap()));
    /// }
    /// assert_eq!(stats.rating_count, 3);
    /// assert!((stats.average_rating - 8.0).abs() < f64::EPSILON);
    /// ```
    pub fn apply(&mut self, delta: &StatisticsDelta) {
        self.completed_transactions = self
            .completed_transactions
            .saturating_add(delta.completed_transactions);
        self.cancellations = self.cancellations.saturating_add(delta.cancellations);
        self.last_minute_cancels_as_seller = self
            .last_minute_cancels_as_seller
            .saturating_add(delta.last_minute_as_seller);
        self.last_minute_cancels_as_buyer = self
            .last_minute_cancels_as_buyer
            .saturating_add(delta.last_minute_as_buyer);
        if let Some(rating) = delta.rating {
            self.rating_count = self.rating_count.saturating_add(1);
            let value = f64::from(rating.value());
            self.average_rating += (value - self.average_rating) / f64::from(self.rating_count);
        }
        self.trust_score = clamp_trust(self.trust_score.saturating_add(delta.trust_change));
        self.version += 1;
    }
}

/// Clamp a raw trust value into the allowed range.
pub fn clamp_trust(value: i32) -> i32 {
    value.clamp(TRUST_SCORE_MIN, TRUST_SCORE_MAX)
}

/// Increment-style change to a user's statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsDelta {
    /// Added to `completed_transactions`.
    pub completed_transactions: u32,
    /// Added to `cancellations`.
    pub cancellations: u32,
    /// Added to `last_minute_cancels_as_seller`.
    pub last_minute_as_seller: u32,
    /// Added to `last_minute_cancels_as_buyer`.
    pub last_minute_as_buyer: u32,
    /// Signed change, saturated on application.
    pub trust_change: i32,
    /// A new rating to fold into the average.
    pub rating: Option<Rating>,
}

impl StatisticsDelta {
    /// Delta recording a single received rating.
    pub fn rating(rating: Rating) -> Self {
        Self {
            rating: Some(rating),
            ..Self::default()
        }
    }

    /// Whether applying this delta would change nothing but the version.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
