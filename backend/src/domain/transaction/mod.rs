//! Escrow transaction aggregate.
//!
//! A [`Transaction`] is only mutated through the state machine in
//! [`machine`]; adapters rebuild it from storage via [`TransactionParts`].

mod action;
pub mod machine;
mod status;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CancellationTiming, Error, UserId};

pub use self::action::{Actor, ActionKind, DisputeOutcome, PartyRole, TransactionAction};
pub use self::status::{ParseTransactionStatusError, TransactionStatus};

/// Identifier of an escrow transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Wrap an existing UUID.
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of the listing being purchased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(Uuid);

impl ListingId {
    /// Wrap an existing UUID.
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque authorization handle returned by the payment gateway on capture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorizationId(String);

impl AuthorizationId {
    /// Wrap a gateway-issued id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl AsRef<str> for AuthorizationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who ended a cancelled or refunded transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    /// The buyer cancelled.
    Buyer,
    /// The seller cancelled, or lost a dispute.
    Seller,
    /// The deadline sweep cancelled.
    System,
}

impl CancelledBy {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
            Self::System => "system",
        }
    }

    /// The party role, or `None` for system cancellations.
    pub fn party(&self) -> Option<PartyRole> {
        match self {
            Self::Buyer => Some(PartyRole::Buyer),
            Self::Seller => Some(PartyRole::Seller),
            Self::System => None,
        }
    }
}

impl From<PartyRole> for CancelledBy {
    fn from(value: PartyRole) -> Self {
        match value {
            PartyRole::Buyer => Self::Buyer,
            PartyRole::Seller => Self::Seller,
        }
    }
}

impl std::str::FromStr for CancelledBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            "system" => Ok(Self::System),
            other => Err(Error::internal(format!("unknown cancelled_by '{other}'"))),
        }
    }
}

/// Cancellation details. The timing tier is always produced by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    /// Who cancelled.
    pub by: CancelledBy,
    /// Free-text reason.
    pub reason: Option<String>,
    /// Classified timing tier.
    pub timing: CancellationTiming,
    /// When the cancellation was recorded.
    pub cancelled_at: DateTime<Utc>,
}

impl Cancellation {
    /// Derived last-minute flag.
    pub fn is_last_minute(&self) -> bool {
        self.timing.is_last_minute()
    }
}

/// Open or resolved dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispute {
    /// Party that raised the dispute.
    pub raised_by: PartyRole,
    /// Stated reason.
    pub reason: String,
    /// When it was raised.
    pub raised_at: DateTime<Utc>,
    /// Timing tier at the moment the dispute was raised.
    pub timing_at_raise: CancellationTiming,
    /// Adjudicated outcome, once resolved.
    pub outcome: Option<DisputeOutcome>,
    /// Adjudicator who resolved it.
    pub resolved_by: Option<UserId>,
}

/// Kind of money movement a settlement claim guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    /// Capture the buyer's deposit into escrow.
    Capture,
    /// Release escrowed funds to the seller.
    Release,
    /// Return escrowed funds to the buyer.
    Refund,
}

impl SettlementKind {
    /// Storage and metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Release => "release",
            Self::Refund => "refund",
        }
    }
}

impl std::str::FromStr for SettlementKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capture" => Ok(Self::Capture),
            "release" => Ok(Self::Release),
            "refund" => Ok(Self::Refund),
            other => Err(Error::internal(format!("unknown settlement kind '{other}'"))),
        }
    }
}

/// Marker that a payment call is in flight for this transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementClaim {
    /// Which payment call is running.
    pub kind: SettlementKind,
    /// When the claim was written.
    pub claimed_at: DateTime<Utc>,
}

/// Marker that an operator must look at this transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualReviewFlag {
    /// Why the transaction was flagged.
    pub reason: String,
    /// When it was flagged.
    pub flagged_at: DateTime<Utc>,
}

/// Validated input for a new transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    /// Purchasing user.
    pub buyer_id: UserId,
    /// Selling user.
    pub seller_id: UserId,
    /// Listing being bought.
    pub listing_id: ListingId,
    /// Amount in minor currency units.
    pub amount: i64,
}

/// Plain-data view of a transaction used by persistence adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionParts {
    pub id: TransactionId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub listing_id: ListingId,
    pub amount: i64,
    pub status: TransactionStatus,
    pub version: i64,
    pub scheduled_meetup_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deposit_submitted_at: Option<DateTime<Utc>>,
    pub cancellation: Option<Cancellation>,
    pub dispute: Option<Dispute>,
    pub partial_refund: bool,
    pub authorization_id: Option<AuthorizationId>,
    pub settlement_claim: Option<SettlementClaim>,
    pub manual_review: Option<ManualReviewFlag>,
    pub reputation_settled_at: Option<DateTime<Utc>>,
}

/// Escrow transaction between one buyer and one seller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    id: TransactionId,
    buyer_id: UserId,
    seller_id: UserId,
    listing_id: ListingId,
    amount: i64,
    status: TransactionStatus,
    version: i64,
    scheduled_meetup_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deposit_submitted_at: Option<DateTime<Utc>>,
    cancellation: Option<Cancellation>,
    dispute: Option<Dispute>,
    partial_refund: bool,
    authorization_id: Option<AuthorizationId>,
    settlement_claim: Option<SettlementClaim>,
    manual_review: Option<ManualReviewFlag>,
    reputation_settled_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Create a `PENDING` transaction.
    ///
    /// Fails with `invalid_request` when the amount is not positive or the
    /// buyer is also the seller.
    pub fn create(input: NewTransaction, now: DateTime<Utc>) -> Result<Self, Error> {
        let NewTransaction {
            buyer_id,
            seller_id,
            listing_id,
            amount,
        } = input;
        if amount <= 0 {
            return Err(Error::invalid_request("amount must be positive")
                .with_details(serde_json::json!({ "amount": amount })));
        }
        if buyer_id.as_uuid() == seller_id.as_uuid() {
            return Err(Error::invalid_request("buyer and seller must differ"));
        }
        Ok(Self {
            id: TransactionId::random(),
            buyer_id,
            seller_id,
            listing_id,
            amount,
            status: TransactionStatus::Pending,
            version: 0,
            scheduled_meetup_at: None,
            created_at: now,
            updated_at: now,
            deposit_submitted_at: None,
            cancellation: None,
            dispute: None,
            partial_refund: false,
            authorization_id: None,
            settlement_claim: None,
            manual_review: None,
            reputation_settled_at: None,
        })
    }

    /// Rebuild a transaction from stored parts.
    pub fn from_parts(parts: TransactionParts) -> Self {
        let TransactionParts {
            id,
            buyer_id,
            seller_id,
            listing_id,
            amount,
            status,
            version,
            scheduled_meetup_at,
            created_at,
            updated_at,
            deposit_submitted_at,
            cancellation,
            dispute,
            partial_refund,
            authorization_id,
            settlement_claim,
            manual_review,
            reputation_settled_at,
        } = parts;
        Self {
            id,
            buyer_id,
            seller_id,
            listing_id,
            amount,
            status,
            version,
            scheduled_meetup_at,
            created_at,
            updated_at,
            deposit_submitted_at,
            cancellation,
            dispute,
            partial_refund,
            authorization_id,
            settlement_claim,
            manual_review,
            reputation_settled_at,
        }
    }

    /// Decompose into plain parts for storage.
    pub fn into_parts(self) -> TransactionParts {
        TransactionParts {
            id: self.id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            listing_id: self.listing_id,
            amount: self.amount,
            status: self.status,
            version: self.version,
            scheduled_meetup_at: self.scheduled_meetup_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deposit_submitted_at: self.deposit_submitted_at,
            cancellation: self.cancellation,
            dispute: self.dispute,
            partial_refund: self.partial_refund,
            authorization_id: self.authorization_id,
            settlement_claim: self.settlement_claim,
            manual_review: self.manual_review,
            reputation_settled_at: self.reputation_settled_at,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn buyer_id(&self) -> &UserId {
        &self.buyer_id
    }

    pub fn seller_id(&self) -> &UserId {
        &self.seller_id
    }

    pub fn listing_id(&self) -> ListingId {
        self.listing_id
    }

    /// Amount in minor currency units.
    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Optimistic concurrency counter, bumped by the repository on each save.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn scheduled_meetup_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_meetup_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn deposit_submitted_at(&self) -> Option<DateTime<Utc>> {
        self.deposit_submitted_at
    }

    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.cancellation.as_ref()
    }

    /// Derived from the cancellation tier; `false` when not cancelled.
    pub fn is_last_minute_cancellation(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(Cancellation::is_last_minute)
    }

    pub fn dispute(&self) -> Option<&Dispute> {
        self.dispute.as_ref()
    }

    pub fn dispute_outcome(&self) -> Option<DisputeOutcome> {
        self.dispute.as_ref().and_then(|d| d.outcome)
    }

    /// Set when a split dispute refunded only part of the amount.
    pub fn partial_refund(&self) -> bool {
        self.partial_refund
    }

    pub fn authorization_id(&self) -> Option<&AuthorizationId> {
        self.authorization_id.as_ref()
    }

    pub fn settlement_claim(&self) -> Option<&SettlementClaim> {
        self.settlement_claim.as_ref()
    }

    pub fn manual_review(&self) -> Option<&ManualReviewFlag> {
        self.manual_review.as_ref()
    }

    pub fn reputation_settled_at(&self) -> Option<DateTime<Utc>> {
        self.reputation_settled_at
    }

    /// Role of `user` in this transaction, if they are a party.
    pub fn role_of(&self, user: &UserId) -> Option<PartyRole> {
        if user.as_uuid() == self.buyer_id.as_uuid() {
            Some(PartyRole::Buyer)
        } else if user.as_uuid() == self.seller_id.as_uuid() {
            Some(PartyRole::Seller)
        } else {
            None
        }
    }

    /// User id for a party role.
    pub fn party(&self, role: PartyRole) -> &UserId {
        match role {
            PartyRole::Buyer => &self.buyer_id,
            PartyRole::Seller => &self.seller_id,
        }
    }

    /// Stamp that all reputation adjustments for the terminal outcome ran.
    pub fn mark_reputation_settled(&mut self, now: DateTime<Utc>) {
        self.reputation_settled_at = Some(now);
        self.updated_at = now;
    }

    /// Flag the transaction for operator attention.
    pub fn flag_for_manual_review(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.manual_review = Some(ManualReviewFlag {
            reason: reason.into(),
            flagged_at: now,
        });
        self.updated_at = now;
    }

    /// Record the version assigned by the repository after a write.
    pub(crate) fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

#[cfg(test)]
mod tests;
