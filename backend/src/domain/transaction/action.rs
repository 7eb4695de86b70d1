//! Typed transition requests.
//!
//! Every operation carries its own payload variant so inputs are validated
//! once, at the boundary, before the state machine sees them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Error, ReviewDraft, UserId};

/// Who is asking for a transition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "userId", rename_all = "snake_case")]
pub enum Actor {
    /// A marketplace user.
    User(UserId),
    /// The deadline sweep or another automated process.
    System,
}

impl Actor {
    /// The user behind this actor, if any.
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::User(id) => Some(id),
            Self::System => None,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::System => f.write_str("system"),
        }
    }
}

/// Role a user plays in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    /// The purchasing party.
    Buyer,
    /// The selling party.
    Seller,
}

impl PartyRole {
    /// The other side of the transaction.
    pub fn counterparty(self) -> Self {
        match self {
            Self::Buyer => Self::Seller,
            Self::Seller => Self::Buyer,
        }
    }
}

/// Adjudicated outcome of a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    /// Buyer wins: funds are refunded and the seller bears the loss.
    BuyerFavored,
    /// Seller wins: funds are released and the buyer bears the loss.
    SellerFavored,
    /// Partial refund; neither party is penalised.
    Split,
}

impl DisputeOutcome {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuyerFavored => "buyer_favored",
            Self::SellerFavored => "seller_favored",
            Self::Split => "split",
        }
    }
}

impl std::str::FromStr for DisputeOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer_favored" => Ok(Self::BuyerFavored),
            "seller_favored" => Ok(Self::SellerFavored),
            "split" => Ok(Self::Split),
            other => Err(Error::invalid_request(format!(
                "unknown dispute outcome '{other}'"
            ))),
        }
    }
}

/// Requested transition with its payload.
///
/// # Examples
/// ```
/// use escrow_backend::domain::TransactionAction;
///
/// let action: TransactionAction =
///     serde_json::from_str(r#"{"action": "cancel", "reason": "changed my mind"}"#).unwrap();
/// assert!(action.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TransactionAction {
    /// Buyer submits the deposit.
    SubmitDeposit,
    /// Seller accepts the deposit; funds are captured.
    AcceptDeposit,
    /// Seller rejects the deposit.
    RejectDeposit {
        /// Optional explanation.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Agree on a meetup time.
    ScheduleMeetup {
        /// When the parties will meet.
        meetup_at: DateTime<Utc>,
    },
    /// Parties have met.
    StartMeetup,
    /// Confirm the handover; funds are released to the seller.
    Complete {
        /// Optional review of the counterparty.
        #[serde(default)]
        review: Option<ReviewDraft>,
    },
    /// Cancel before completion.
    Cancel {
        /// Free-text reason.
        reason: String,
    },
    /// Cancel and return funds to the buyer.
    Refund {
        /// Free-text reason.
        reason: String,
    },
    /// Escalate for adjudication.
    RaiseDispute {
        /// Why the party is disputing.
        reason: String,
    },
    /// Record the adjudicator's decision.
    ResolveDispute {
        /// Decided outcome.
        outcome: DisputeOutcome,
    },
}

/// Payload-free discriminant of [`TransactionAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// See [`TransactionAction::SubmitDeposit`].
    SubmitDeposit,
    /// See [`TransactionAction::AcceptDeposit`].
    AcceptDeposit,
    /// See [`TransactionAction::RejectDeposit`].
    RejectDeposit,
    /// See [`TransactionAction::ScheduleMeetup`].
    ScheduleMeetup,
    /// See [`TransactionAction::StartMeetup`].
    StartMeetup,
    /// See [`TransactionAction::Complete`].
    Complete,
    /// See [`TransactionAction::Cancel`].
    Cancel,
    /// See [`TransactionAction::Refund`].
    Refund,
    /// See [`TransactionAction::RaiseDispute`].
    RaiseDispute,
    /// See [`TransactionAction::ResolveDispute`].
    ResolveDispute,
}

impl ActionKind {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubmitDeposit => "submit_deposit",
            Self::AcceptDeposit => "accept_deposit",
            Self::RejectDeposit => "reject_deposit",
            Self::ScheduleMeetup => "schedule_meetup",
            Self::StartMeetup => "start_meetup",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
            Self::Refund => "refund",
            Self::RaiseDispute => "raise_dispute",
            Self::ResolveDispute => "resolve_dispute",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TransactionAction {
    /// Discriminant of this action.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::SubmitDeposit => ActionKind::SubmitDeposit,
            Self::AcceptDeposit => ActionKind::AcceptDeposit,
            Self::RejectDeposit { .. } => ActionKind::RejectDeposit,
            Self::ScheduleMeetup { .. } => ActionKind::ScheduleMeetup,
            Self::StartMeetup => ActionKind::StartMeetup,
            Self::Complete { .. } => ActionKind::Complete,
            Self::Cancel { .. } => ActionKind::Cancel,
            Self::Refund { .. } => ActionKind::Refund,
            Self::RaiseDispute { .. } => ActionKind::RaiseDispute,
            Self::ResolveDispute { .. } => ActionKind::ResolveDispute,
        }
    }

    /// Check payload content that the type system cannot express.
    ///
    /// Ratings are already range-checked by [`crate::domain::Rating`].
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Self::RaiseDispute { reason } if reason.trim().is_empty() => {
                Err(Error::invalid_request("dispute reason must not be empty"))
            }
            _ => Ok(()),
        }
    }
}
