//! Domain events emitted to the notification port after each write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    CancellationTiming, CancelledBy, DisputeOutcome, PartyRole, Rating, Review, Transaction,
    TransactionAction, TransactionId, UserId,
};

/// Payload describing what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EscrowEventKind {
    Created {
        buyer_id: UserId,
        seller_id: UserId,
        amount: i64,
    },
    DepositSubmitted,
    DepositAccepted,
    DepositRejected {
        reason: Option<String>,
    },
    MeetupScheduled {
        meetup_at: DateTime<Utc>,
    },
    MeetupStarted,
    Completed,
    Cancelled {
        cancelled_by: CancelledBy,
        timing: CancellationTiming,
        is_last_minute: bool,
    },
    Refunded {
        cancelled_by: Option<CancelledBy>,
        partial: bool,
    },
    DisputeRaised {
        raised_by: PartyRole,
        reason: String,
    },
    DisputeResolved {
        outcome: DisputeOutcome,
    },
    ReviewSubmitted {
        rater_id: UserId,
        rated_id: UserId,
        rating: Rating,
    },
    FlaggedForManualReview {
        reason: String,
    },
}

impl EscrowEventKind {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::DepositSubmitted => "deposit_submitted",
            Self::DepositAccepted => "deposit_accepted",
            Self::DepositRejected { .. } => "deposit_rejected",
            Self::MeetupScheduled { .. } => "meetup_scheduled",
            Self::MeetupStarted => "meetup_started",
            Self::Completed => "completed",
            Self::Cancelled { .. } => "cancelled",
            Self::Refunded { .. } => "refunded",
            Self::DisputeRaised { .. } => "dispute_raised",
            Self::DisputeResolved { .. } => "dispute_resolved",
            Self::ReviewSubmitted { .. } => "review_submitted",
            Self::FlaggedForManualReview { .. } => "flagged_for_manual_review",
        }
    }
}

/// Event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowEvent {
    pub transaction_id: TransactionId,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EscrowEventKind,
}

impl EscrowEvent {
    /// Event for a newly created transaction.
    pub fn created(transaction: &Transaction) -> Self {
        Self {
            transaction_id: transaction.id(),
            occurred_at: transaction.created_at(),
            kind: EscrowEventKind::Created {
                buyer_id: transaction.buyer_id().clone(),
                seller_id: transaction.seller_id().clone(),
                amount: transaction.amount(),
            },
        }
    }

    /// Event for a transition that has just been written.
    pub fn transitioned(transaction: &Transaction, action: &TransactionAction) -> Self {
        let kind = match action {
            TransactionAction::SubmitDeposit => EscrowEventKind::DepositSubmitted,
            TransactionAction::AcceptDeposit => EscrowEventKind::DepositAccepted,
            TransactionAction::RejectDeposit { reason } => EscrowEventKind::DepositRejected {
                reason: reason.clone(),
            },
            TransactionAction::ScheduleMeetup { meetup_at } => EscrowEventKind::MeetupScheduled {
                meetup_at: *meetup_at,
            },
            TransactionAction::StartMeetup => EscrowEventKind::MeetupStarted,
            TransactionAction::Complete { .. } => EscrowEventKind::Completed,
            TransactionAction::Cancel { .. } => EscrowEventKind::Cancelled {
                cancelled_by: transaction
                    .cancellation()
                    .map_or(CancelledBy::System, |c| c.by),
                timing: transaction
                    .cancellation()
                    .map_or(CancellationTiming::Unscheduled, |c| c.timing),
                is_last_minute: transaction.is_last_minute_cancellation(),
            },
            TransactionAction::Refund { .. } => EscrowEventKind::Refunded {
                cancelled_by: transaction.cancellation().map(|c| c.by),
                partial: transaction.partial_refund(),
            },
            TransactionAction::RaiseDispute { reason } => EscrowEventKind::DisputeRaised {
                raised_by: transaction
                    .dispute()
                    .map_or(PartyRole::Buyer, |d| d.raised_by),
                reason: reason.clone(),
            },
            TransactionAction::ResolveDispute { outcome } => {
                EscrowEventKind::DisputeResolved { outcome: *outcome }
            }
        };
        Self {
            transaction_id: transaction.id(),
            occurred_at: transaction.updated_at(),
            kind,
        }
    }

    /// Event for a stored review.
    pub fn review_submitted(review: &Review) -> Self {
        Self {
            transaction_id: review.transaction_id,
            occurred_at: review.created_at,
            kind: EscrowEventKind::ReviewSubmitted {
                rater_id: review.rater_id.clone(),
                rated_id: review.rated_id.clone(),
                rating: review.rating,
            },
        }
    }

    /// Event for a transaction flagged for operator attention.
    pub fn flagged(transaction_id: TransactionId, reason: &str, now: DateTime<Utc>) -> Self {
        Self {
            transaction_id,
            occurred_at: now,
            kind: EscrowEventKind::FlaggedForManualReview {
                reason: reason.to_owned(),
            },
        }
    }
}
