//! Post-completion reviews between the two parties of a transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TransactionId, UserId};

/// Lowest accepted rating.
pub const RATING_MIN: u8 = 1;
/// Highest accepted rating.
pub const RATING_MAX: u8 = 10;

/// Validation errors for review input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReviewValidationError {
    /// Rating fell outside the accepted range.
    #[error("rating must be between 1 and 10, got {value}")]
    RatingOutOfRange {
        /// The rejected value.
        value: i64,
    },
}

/// Integer rating in `1..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Rating(u8);

impl Rating {
    /// Validate a rating.
    ///
    /// ```
    /// # use escrow_backend::domain::Rating;
    /// assert!(Rating::new(10).is_ok());
    /// assert!(Rating::new(0).is_err());
    /// assert!(Rating::new(11).is_err());
    /// ```
    pub fn new(value: i64) -> Result<Self, ReviewValidationError> {
        u8::try_from(value)
            .ok()
            .filter(|v| (RATING_MIN..=RATING_MAX).contains(v))
            .map(Self)
            .ok_or(ReviewValidationError::RatingOutOfRange { value })
    }

    /// The numeric value.
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Rating {
    type Error = ReviewValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(value: Rating) -> Self {
        value.0
    }
}

/// Rating and comment supplied alongside a completion or on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDraft {
    /// Validated rating.
    pub rating: Rating,
    /// Optional free-text comment.
    #[serde(default)]
    pub comment: Option<String>,
}

/// A stored review. At most one exists per `(transaction_id, rater_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    /// Reviewed transaction.
    pub transaction_id: TransactionId,
    /// Party writing the review.
    pub rater_id: UserId,
    /// Counterparty being rated.
    pub rated_id: UserId,
    /// Rating in `1..=10`.
    pub rating: Rating,
    /// Optional comment.
    pub comment: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}
