//! Reputation adjustment engine.
//!
//! Turns a terminal transaction, or a review, into per-user
//! [`StatisticsDelta`] values. Each delta carries an [`AdjustmentKey`] so the
//! store can apply it at most once no matter how often the outcome is
//! delivered.

mod policy;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{
    DisputeOutcome, Error, PartyRole, Review, StatisticsDelta, Transaction,
    TransactionId, TransactionStatus, UserId,
};

pub use self::policy::{TieredTrustPolicy, TrustPolicy};
#[cfg(test)]
pub use self::policy::MockTrustPolicy;

/// Outcome category used in adjustment idempotency keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Transaction completed normally.
    Completed,
    /// Transaction cancelled by a party.
    Cancelled,
    /// Transaction refunded by a party.
    Refunded,
    /// Dispute adjudicated.
    DisputeResolved,
    /// Buyer reviewed the seller.
    ReviewByBuyer,
    /// Seller reviewed the buyer.
    ReviewBySeller,
}

impl OutcomeKind {
    /// All outcome kinds.
    pub const ALL: [OutcomeKind; 6] = [
        OutcomeKind::Completed,
        OutcomeKind::Cancelled,
        OutcomeKind::Refunded,
        OutcomeKind::DisputeResolved,
        OutcomeKind::ReviewByBuyer,
        OutcomeKind::ReviewBySeller,
    ];

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::DisputeResolved => "dispute_resolved",
            Self::ReviewByBuyer => "review_by_buyer",
            Self::ReviewBySeller => "review_by_seller",
        }
    }

    /// Key kind for a review written by `rater`.
    pub fn review_by(rater: PartyRole) -> Self {
        match rater {
            PartyRole::Buyer => Self::ReviewByBuyer,
            PartyRole::Seller => Self::ReviewBySeller,
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::internal(format!("unknown outcome kind '{s}'")))
    }
}

/// Idempotency key for one outcome of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentKey {
    /// Transaction the outcome belongs to.
    pub transaction_id: TransactionId,
    /// Which outcome of that transaction.
    pub outcome: OutcomeKind,
}

impl AdjustmentKey {
    /// Build a key.
    pub fn new(transaction_id: TransactionId, outcome: OutcomeKind) -> Self {
        Self {
            transaction_id,
            outcome,
        }
    }
}

impl fmt::Display for AdjustmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_id, self.outcome)
    }
}

/// Delta destined for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAdjustment {
    /// User whose statistics change.
    pub user_id: UserId,
    /// Increments to apply.
    pub delta: StatisticsDelta,
    /// Applied at most once per user.
    pub key: AdjustmentKey,
}

fn to_points(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn completion_delta(policy: &dyn TrustPolicy) -> StatisticsDelta {
    StatisticsDelta {
        completed_transactions: 1,
        trust_change: to_points(policy.completion_reward()),
        ..StatisticsDelta::default()
    }
}

fn cancellation_delta(
    transaction: &Transaction,
    role: PartyRole,
    policy: &dyn TrustPolicy,
    extra_penalty: u32,
) -> StatisticsDelta {
    let (timing, last_minute) = transaction
        .cancellation()
        .map(|c| (Some(c.timing), c.is_last_minute()))
        .unwrap_or((None, false));
    let penalty = timing
        .map(|tier| policy.cancellation_penalty(tier))
        .unwrap_or(0)
        .saturating_add(extra_penalty);
    let last_minute = u32::from(last_minute);
    StatisticsDelta {
        cancellations: 1,
        last_minute_as_seller: if role == PartyRole::Seller { last_minute } else { 0 },
        last_minute_as_buyer: if role == PartyRole::Buyer { last_minute } else { 0 },
        trust_change: -to_points(penalty),
        ..StatisticsDelta::default()
    }
}

/// Deltas owed for a transaction's terminal outcome.
///
/// Returns an empty list for non-terminal transactions, rejected deposits,
/// system cancellations and split disputes. The list is a pure function of
/// the stored transaction, so recomputing it after a crash yields the same
/// keys.
pub fn outcome_adjustments(
    transaction: &Transaction,
    policy: &dyn TrustPolicy,
) -> Vec<UserAdjustment> {
    let id = transaction.id();
    let for_party = |role: PartyRole, outcome: OutcomeKind, delta: StatisticsDelta| UserAdjustment {
        user_id: transaction.party(role).clone(),
        delta,
        key: AdjustmentKey::new(id, outcome),
    };

    match (transaction.status(), transaction.dispute_outcome()) {
        (TransactionStatus::Completed, Some(DisputeOutcome::SellerFavored)) => {
            let mut buyer = completion_delta(policy);
            buyer.trust_change -= to_points(policy.dispute_loss_penalty());
            vec![
                for_party(PartyRole::Buyer, OutcomeKind::DisputeResolved, buyer),
                for_party(
                    PartyRole::Seller,
                    OutcomeKind::DisputeResolved,
                    completion_delta(policy),
                ),
            ]
        }
        (TransactionStatus::Completed, _) => vec![
            for_party(PartyRole::Buyer, OutcomeKind::Completed, completion_delta(policy)),
            for_party(PartyRole::Seller, OutcomeKind::Completed, completion_delta(policy)),
        ],
        (TransactionStatus::Refunded, Some(DisputeOutcome::BuyerFavored)) => {
            let delta = cancellation_delta(
                transaction,
                PartyRole::Seller,
                policy,
                policy.dispute_loss_penalty(),
            );
            vec![for_party(PartyRole::Seller, OutcomeKind::DisputeResolved, delta)]
        }
        (TransactionStatus::Refunded, Some(DisputeOutcome::Split)) => Vec::new(),
        (status @ (TransactionStatus::Cancelled | TransactionStatus::Refunded), _) => {
            let outcome = if status == TransactionStatus::Cancelled {
                OutcomeKind::Cancelled
            } else {
                OutcomeKind::Refunded
            };
            let Some(role) = transaction
                .cancellation()
                .and_then(|c| c.by.party())
            else {
                return Vec::new();
            };
            vec![for_party(
                role,
                outcome,
                cancellation_delta(transaction, role, policy, 0),
            )]
        }
        _ => Vec::new(),
    }
}

/// Delta owed to the rated user for a review.
pub fn review_adjustment(review: &Review, rater_role: PartyRole) -> UserAdjustment {
    UserAdjustment {
        user_id: review.rated_id.clone(),
        delta: StatisticsDelta::rating(review.rating),
        key: AdjustmentKey::new(review.transaction_id, OutcomeKind::review_by(rater_role)),
    }
}
