//! Trust score weighting.

use serde::{Deserialize, Serialize};

use crate::domain::CancellationTiming;

/// Strategy deciding how much trust an outcome costs or earns.
#[cfg_attr(test, mockall::automock)]
pub trait TrustPolicy: Send + Sync {
    /// Points removed from the canceller for a cancellation in `timing`.
    fn cancellation_penalty(&self, timing: CancellationTiming) -> u32;

    /// Points added to each party on completion.
    fn completion_reward(&self) -> u32;

    /// Extra points removed from the losing side of a dispute.
    fn dispute_loss_penalty(&self) -> u32;
}

/// Fixed penalty per timing tier.
///
/// Later cancellations cost more. Cancelling after the meetup time has passed
/// is treated like a last-minute cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredTrustPolicy {
    /// Penalty for cancelling once the meetup time has passed.
    pub after_scheduled_time: u32,
    /// Penalty for cancelling under two hours ahead.
    pub last_minute: u32,
    /// Penalty for cancelling two to six hours ahead.
    pub same_day: u32,
    /// Penalty for cancelling six to 24 hours ahead.
    pub one_day_before: u32,
    /// Penalty for cancelling 24 to 72 hours ahead.
    pub few_days_before: u32,
    /// Penalty for cancelling 72 or more hours ahead.
    pub well_in_advance: u32,
    /// Penalty for cancelling before any meetup was scheduled.
    pub unscheduled: u32,
    /// Reward for each party on completion.
    pub completion_reward: u32,
    /// Penalty for the party a dispute rules against.
    pub dispute_loss: u32,
}

impl Default for TieredTrustPolicy {
    fn default() -> Self {
        Self {
            after_scheduled_time: 15,
            last_minute: 15,
            same_day: 8,
            one_day_before: 4,
            few_days_before: 2,
            well_in_advance: 0,
            unscheduled: 1,
            completion_reward: 1,
            dispute_loss: 10,
        }
    }
}

impl TrustPolicy for TieredTrustPolicy {
    fn cancellation_penalty(&self, timing: CancellationTiming) -> u32 {
        match timing {
            CancellationTiming::AfterScheduledTime => self.after_scheduled_time,
            CancellationTiming::LastMinute => self.last_minute,
            CancellationTiming::SameDay => self.same_day,
            CancellationTiming::OneDayBefore => self.one_day_before,
            CancellationTiming::FewDaysBefore => self.few_days_before,
            CancellationTiming::WellInAdvance => self.well_in_advance,
            CancellationTiming::Unscheduled => self.unscheduled,
        }
    }

    fn completion_reward(&self) -> u32 {
        self.completion_reward
    }

    fn dispute_loss_penalty(&self) -> u32 {
        self.dispute_loss
    }
}
