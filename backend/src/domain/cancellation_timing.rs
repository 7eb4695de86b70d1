//! Cancellation timing tiers.
//!
//! A cancellation is bucketed by how far ahead of the scheduled meetup it
//! happened. The tier drives both the last-minute counters in user
//! statistics and the size of the trust penalty applied by the active
//! [`TrustPolicy`](crate::domain::reputation::TrustPolicy).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Named bucket for the distance between a cancellation and its meetup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationTiming {
    /// Cancelled once the meetup time had already passed.
    AfterScheduledTime,
    /// Less than two hours before the meetup.
    LastMinute,
    /// Between two and six hours before the meetup.
    SameDay,
    /// Between six and twenty-four hours before the meetup.
    OneDayBefore,
    /// Between one and three days before the meetup.
    FewDaysBefore,
    /// Three days or more before the meetup.
    WellInAdvance,
    /// No meetup had been scheduled.
    Unscheduled,
}

impl CancellationTiming {
    /// All tiers, ordered from most to least severe.
    pub const ALL: [CancellationTiming; 7] = [
        CancellationTiming::AfterScheduledTime,
        CancellationTiming::LastMinute,
        CancellationTiming::SameDay,
        CancellationTiming::OneDayBefore,
        CancellationTiming::FewDaysBefore,
        CancellationTiming::WellInAdvance,
        CancellationTiming::Unscheduled,
    ];

    /// Returns the storage representation.
    ///
    /// ```
    /// # use escrow_backend::domain::CancellationTiming;
    /// assert_eq!(CancellationTiming::LastMinute.as_str(), "last_minute");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AfterScheduledTime => "after_scheduled_time",
            Self::LastMinute => "last_minute",
            Self::SameDay => "same_day",
            Self::OneDayBefore => "one_day_before",
            Self::FewDaysBefore => "few_days_before",
            Self::WellInAdvance => "well_in_advance",
            Self::Unscheduled => "unscheduled",
        }
    }

    /// Whether this tier counts as a last-minute cancellation.
    pub fn is_last_minute(&self) -> bool {
        matches!(self, Self::LastMinute)
    }
}

impl fmt::Display for CancellationTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown tier name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cancellation timing '{input}'")]
pub struct ParseCancellationTimingError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for CancellationTiming {
    type Err = ParseCancellationTimingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == s)
            .ok_or_else(|| ParseCancellationTimingError {
                input: s.to_owned(),
            })
    }
}

/// Classify a cancellation made at `cancelled_at` against an optional meetup.
///
/// The boundaries are half-open: exactly two hours ahead is `same_day`, exactly
/// the meetup instant is `last_minute`.
///
/// # Examples
/// ```
/// use chrono::{Duration, Utc};
/// use escrow_backend::domain::{classify_cancellation, CancellationTiming};
///
/// let now = Utc::now();
/// let tier = classify_cancellation(Some(now + Duration::hours(1)), now);
/// assert_eq!(tier, CancellationTiming::LastMinute);
/// assert_eq!(classify_cancellation(None, now), CancellationTiming::Unscheduled);
/// ```
pub fn classify_cancellation(
    scheduled_meetup_at: Option<DateTime<Utc>>,
    cancelled_at: DateTime<Utc>,
) -> CancellationTiming {
    let Some(meetup) = scheduled_meetup_at else {
        return CancellationTiming::Unscheduled;
    };
    let lead = meetup - cancelled_at;

    match lead {
        lead if lead < TimeDelta::zero() => CancellationTiming::AfterScheduledTime,
        lead if lead < TimeDelta::hours(2) => CancellationTiming::LastMinute,
        lead if lead < TimeDelta::hours(6) => CancellationTiming::SameDay,
        lead if lead < TimeDelta::hours(24) => CancellationTiming::OneDayBefore,
        lead if lead < TimeDelta::hours(72) => CancellationTiming::FewDaysBefore,
        _ => CancellationTiming::WellInAdvance,
    }
}
