//! Canonical transaction status enumeration.
//!
//! Stored rows written by older releases used several synonyms for the same
//! state. Those names are accepted on read and mapped onto one canonical
//! variant; writes only ever use [`TransactionStatus::as_str`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an escrow transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Created, waiting for the buyer's deposit.
    Pending,
    /// Buyer submitted a deposit, waiting for the seller.
    DepositSubmitted,
    /// Seller accepted; funds are held in escrow.
    #[serde(alias = "IN_ESCROW", alias = "ESCROWED")]
    DepositAccepted,
    /// Seller rejected the deposit.
    DepositRejected,
    /// A meetup time has been agreed.
    #[serde(alias = "MEETUP_PENDING")]
    MeetupScheduled,
    /// The meetup is under way.
    #[serde(alias = "ACTIVE")]
    InProgress,
    /// Funds released to the seller.
    Completed,
    /// Cancelled by a party or by the deadline sweep.
    #[serde(alias = "CANCELED")]
    Cancelled,
    /// Funds returned to the buyer.
    Refunded,
    /// Awaiting external adjudication.
    Disputed,
}

impl TransactionStatus {
    /// All canonical statuses.
    pub const ALL: [TransactionStatus; 10] = [
        TransactionStatus::Pending,
        TransactionStatus::DepositSubmitted,
        TransactionStatus::DepositAccepted,
        TransactionStatus::DepositRejected,
        TransactionStatus::MeetupScheduled,
        TransactionStatus::InProgress,
        TransactionStatus::Completed,
        TransactionStatus::Cancelled,
        TransactionStatus::Refunded,
        TransactionStatus::Disputed,
    ];

    /// Legacy names accepted on read, paired with their canonical status.
    pub const LEGACY_ALIASES: [(&'static str, TransactionStatus); 5] = [
        ("IN_ESCROW", TransactionStatus::DepositAccepted),
        ("ESCROWED", TransactionStatus::DepositAccepted),
        ("MEETUP_PENDING", TransactionStatus::MeetupScheduled),
        ("ACTIVE", TransactionStatus::InProgress),
        ("CANCELED", TransactionStatus::Cancelled),
    ];

    /// Returns the canonical storage representation.
    ///
    /// ```
    /// # use escrow_backend::domain::TransactionStatus;
    /// assert_eq!(TransactionStatus::DepositAccepted.as_str(), "DEPOSIT_ACCEPTED");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::DepositSubmitted => "DEPOSIT_SUBMITTED",
            Self::DepositAccepted => "DEPOSIT_ACCEPTED",
            Self::DepositRejected => "DEPOSIT_REJECTED",
            Self::MeetupScheduled => "MEETUP_SCHEDULED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
            Self::Disputed => "DISPUTED",
        }
    }

    /// Whether no further transition is permitted from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DepositRejected | Self::Completed | Self::Cancelled | Self::Refunded
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transaction status '{input}'")]
pub struct ParseTransactionStatusError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for TransactionStatus {
    type Err = ParseTransactionStatusError;

    /// Parse a canonical or legacy status name.
    ///
    /// ```
    /// # use escrow_backend::domain::TransactionStatus;
    /// let status: TransactionStatus = "IN_ESCROW".parse().unwrap();
    /// assert_eq!(status, TransactionStatus::DepositAccepted);
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .or_else(|| {
                Self::LEGACY_ALIASES
                    .into_iter()
                    .find_map(|(alias, status)| (alias == s).then_some(status))
            })
            .ok_or_else(|| ParseTransactionStatusError {
                input: s.to_owned(),
            })
    }
}
