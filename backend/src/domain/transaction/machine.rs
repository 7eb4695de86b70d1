//! Transition table and state machine for escrow transactions.
//!
//! [`plan`] validates a request without touching the record and tells the
//! caller whether money has to move first. [`apply`] performs the mutation
//! once any payment call has succeeded. Both consult [`TRANSITION_TABLE`],
//! the only place legality is defined.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::domain::{classify_cancellation, Error};

use super::{
    ActionKind, Actor, AuthorizationId, Cancellation, CancelledBy, Dispute, DisputeOutcome,
    PartyRole, SettlementClaim, SettlementKind, Transaction, TransactionAction,
    TransactionStatus,
};

use super::TransactionStatus::{
    DepositAccepted, DepositSubmitted, Disputed, InProgress, MeetupScheduled, Pending,
};

const CANCELLABLE: &[TransactionStatus] = &[
    Pending,
    DepositSubmitted,
    DepositAccepted,
    MeetupScheduled,
    InProgress,
];

/// Statuses from which each action is legal.
pub const TRANSITION_TABLE: [(ActionKind, &[TransactionStatus]); 10] = [
    (ActionKind::SubmitDeposit, &[Pending]),
    (ActionKind::AcceptDeposit, &[DepositSubmitted]),
    (ActionKind::RejectDeposit, &[DepositSubmitted]),
    (ActionKind::ScheduleMeetup, &[DepositAccepted]),
    (ActionKind::StartMeetup, &[MeetupScheduled]),
    (ActionKind::Complete, &[MeetupScheduled, InProgress]),
    (ActionKind::Cancel, CANCELLABLE),
    (ActionKind::Refund, CANCELLABLE),
    (
        ActionKind::RaiseDispute,
        &[DepositAccepted, MeetupScheduled, InProgress],
    ),
    (ActionKind::ResolveDispute, &[Disputed]),
];

/// Statuses from which `kind` may be applied.
pub fn permitted_from(kind: ActionKind) -> &'static [TransactionStatus] {
    TRANSITION_TABLE
        .iter()
        .find_map(|(candidate, from)| (*candidate == kind).then_some(*from))
        .unwrap_or(&[])
}

/// Whether `kind` is legal from `status`.
pub fn is_permitted(kind: ActionKind, status: TransactionStatus) -> bool {
    permitted_from(kind).contains(&status)
}

/// Status a successful action lands in.
pub fn target_status(action: &TransactionAction) -> TransactionStatus {
    match action {
        TransactionAction::SubmitDeposit => TransactionStatus::DepositSubmitted,
        TransactionAction::AcceptDeposit => TransactionStatus::DepositAccepted,
        TransactionAction::RejectDeposit { .. } => TransactionStatus::DepositRejected,
        TransactionAction::ScheduleMeetup { .. } => TransactionStatus::MeetupScheduled,
        TransactionAction::StartMeetup => TransactionStatus::InProgress,
        TransactionAction::Complete { .. } => TransactionStatus::Completed,
        TransactionAction::Cancel { .. } => TransactionStatus::Cancelled,
        TransactionAction::Refund { .. } => TransactionStatus::Refunded,
        TransactionAction::RaiseDispute { .. } => TransactionStatus::Disputed,
        TransactionAction::ResolveDispute { outcome } => match outcome {
            DisputeOutcome::SellerFavored => TransactionStatus::Completed,
            DisputeOutcome::BuyerFavored | DisputeOutcome::Split => TransactionStatus::Refunded,
        },
    }
}

/// Capacity in which an actor is allowed to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActingAs {
    /// One of the two parties.
    Party(PartyRole),
    /// The automated sweep.
    System,
    /// A third party deciding a dispute.
    Adjudicator,
}

impl ActingAs {
    /// How this actor is recorded on a cancellation.
    fn cancelled_by(self) -> CancelledBy {
        match self {
            Self::Party(role) => role.into(),
            Self::System | Self::Adjudicator => CancelledBy::System,
        }
    }
}

/// What the caller must do to carry out a validated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPlan {
    /// The request is an idempotent repeat; return the record as-is.
    Unchanged,
    /// Apply the transition with no payment call.
    Apply,
    /// Claim the transaction, move money, then apply.
    Settle(SettlementKind),
}

/// Check who may perform `action` on `transaction`.
pub fn authorize(
    transaction: &Transaction,
    actor: &Actor,
    action: &TransactionAction,
) -> Result<ActingAs, Error> {
    let kind = action.kind();
    let Some(user) = actor.user_id() else {
        return match kind {
            ActionKind::Cancel | ActionKind::Refund => Ok(ActingAs::System),
            _ => Err(Error::invalid_request(format!(
                "system actor may not {kind}"
            ))),
        };
    };
    let role = transaction.role_of(user);

    if kind == ActionKind::ResolveDispute {
        return match role {
            None => Ok(ActingAs::Adjudicator),
            Some(_) => Err(Error::invalid_request(
                "a party may not adjudicate its own dispute",
            )),
        };
    }

    let role = role.ok_or_else(|| {
        Error::invalid_request("actor is not a party to this transaction")
            .with_details(json!({ "transactionId": transaction.id(), "userId": user }))
    })?;
    let required = match kind {
        ActionKind::SubmitDeposit => Some(PartyRole::Buyer),
        ActionKind::AcceptDeposit | ActionKind::RejectDeposit => Some(PartyRole::Seller),
        _ => None,
    };
    match required {
        Some(expected) if expected != role => Err(Error::invalid_request(format!(
            "only the {} may {kind}",
            match expected {
                PartyRole::Buyer => "buyer",
                PartyRole::Seller => "seller",
            }
        ))),
        _ => Ok(ActingAs::Party(role)),
    }
}

fn illegal(transaction: &Transaction, kind: ActionKind) -> Error {
    Error::invalid_state_transition(format!(
        "cannot {kind} a transaction in status {}",
        transaction.status()
    ))
    .with_details(json!({
        "transactionId": transaction.id(),
        "status": transaction.status(),
        "action": kind.as_str(),
    }))
}

/// Money movement needed before `action` can be applied, if any.
pub fn settlement_for(
    transaction: &Transaction,
    action: &TransactionAction,
) -> Option<SettlementKind> {
    let has_funds = transaction.authorization_id().is_some();
    match action {
        TransactionAction::AcceptDeposit => Some(SettlementKind::Capture),
        TransactionAction::Complete { .. } if has_funds => Some(SettlementKind::Release),
        TransactionAction::Cancel { .. } | TransactionAction::Refund { .. } if has_funds => {
            Some(SettlementKind::Refund)
        }
        TransactionAction::ResolveDispute { outcome } if has_funds => match outcome {
            DisputeOutcome::SellerFavored => Some(SettlementKind::Release),
            DisputeOutcome::BuyerFavored | DisputeOutcome::Split => Some(SettlementKind::Refund),
        },
        _ => None,
    }
}

/// Validate a request against the current record without mutating it.
///
/// # Examples
/// ```
/// use chrono::Utc;
/// use escrow_backend::domain::machine::{plan, TransitionPlan};
/// use escrow_backend::domain::{
///     Actor, ListingId, NewTransaction, Transaction, TransactionAction, UserId,
/// };
///
/// let buyer = UserId::random();
/// let txn = Transaction::create(
///     NewTransaction {
///         buyer_id: buyer.clone(),
///         seller_id: UserId::random(),
///         listing_id: ListingId::new(uuid::Uuid::new_v4()),
///         amount: 2_500,
///     },
///     Utc::now(),
/// )
/// .unwrap();
/// let step = plan(&txn, &Actor::User(buyer), &TransactionAction::SubmitDeposit).unwrap();
/// assert_eq!(step, TransitionPlan::Apply);
/// ```
pub fn plan(
    transaction: &Transaction,
    actor: &Actor,
    action: &TransactionAction,
) -> Result<TransitionPlan, Error> {
    action.validate()?;
    authorize(transaction, actor, action)?;
    let kind = action.kind();

    if kind == ActionKind::Complete && transaction.status() == TransactionStatus::Completed {
        return Ok(TransitionPlan::Unchanged);
    }
    if let Some(claim) = transaction.settlement_claim() {
        return Err(Error::invalid_state_transition(format!(
            "a {} settlement is in progress",
            claim.kind.as_str()
        ))
        .with_details(json!({ "transactionId": transaction.id(), "action": kind.as_str() })));
    }
    if !is_permitted(kind, transaction.status()) {
        return Err(illegal(transaction, kind));
    }

    match settlement_for(transaction, action) {
        Some(_) if transaction.manual_review().is_some() => Err(Error::invalid_state_transition(
            "transaction is flagged for manual review; payment actions are blocked",
        )
        .with_details(json!({ "transactionId": transaction.id() }))),
        Some(settlement) => Ok(TransitionPlan::Settle(settlement)),
        None => Ok(TransitionPlan::Apply),
    }
}

/// Apply a validated transition. Any settlement claim is cleared.
///
/// The transition table and actor rules are checked again so a stale plan can
/// never push the record into an illegal status.
pub fn apply(
    transaction: &mut Transaction,
    actor: &Actor,
    action: &TransactionAction,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let acting = authorize(transaction, actor, action)?;
    let kind = action.kind();
    if !is_permitted(kind, transaction.status()) {
        return Err(illegal(transaction, kind));
    }

    match action {
        TransactionAction::SubmitDeposit => {
            transaction.deposit_submitted_at = Some(now);
        }
        TransactionAction::ScheduleMeetup { meetup_at } => {
            if *meetup_at <= now {
                return Err(Error::invalid_request("meetup must be scheduled in the future")
                    .with_details(json!({ "meetupAt": meetup_at })));
            }
            transaction.scheduled_meetup_at = Some(*meetup_at);
        }
        TransactionAction::Cancel { reason } | TransactionAction::Refund { reason } => {
            transaction.cancellation = Some(Cancellation {
                by: acting.cancelled_by(),
                reason: Some(reason.clone()).filter(|r| !r.trim().is_empty()),
                timing: classify_cancellation(transaction.scheduled_meetup_at, now),
                cancelled_at: now,
            });
        }
        TransactionAction::RaiseDispute { reason } => {
            let ActingAs::Party(raised_by) = acting else {
                return Err(Error::invalid_request("only a party may raise a dispute"));
            };
            transaction.dispute = Some(Dispute {
                raised_by,
                reason: reason.clone(),
                raised_at: now,
                timing_at_raise: classify_cancellation(transaction.scheduled_meetup_at, now),
                outcome: None,
                resolved_by: None,
            });
        }
        TransactionAction::ResolveDispute { outcome } => {
            resolve_dispute(transaction, actor, *outcome, now)?;
        }
        TransactionAction::AcceptDeposit
        | TransactionAction::RejectDeposit { .. }
        | TransactionAction::StartMeetup
        | TransactionAction::Complete { .. } => {}
    }

    transaction.status = target_status(action);
    transaction.settlement_claim = None;
    transaction.updated_at = now;
    Ok(())
}

fn resolve_dispute(
    transaction: &mut Transaction,
    actor: &Actor,
    outcome: DisputeOutcome,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let Some(dispute) = transaction.dispute.as_mut() else {
        return Err(Error::internal("disputed transaction has no dispute record"));
    };
    dispute.outcome = Some(outcome);
    dispute.resolved_by = actor.user_id().cloned();

    match outcome {
        DisputeOutcome::BuyerFavored => {
            transaction.cancellation = Some(Cancellation {
                by: CancelledBy::Seller,
                reason: Some(dispute.reason.clone()),
                timing: dispute.timing_at_raise,
                cancelled_at: now,
            });
        }
        DisputeOutcome::Split => transaction.partial_refund = true,
        DisputeOutcome::SellerFavored => {}
    }
    Ok(())
}

impl Transaction {
    /// Mark that `kind` is about to move money.
    ///
    /// Fails if another settlement already holds the claim.
    pub fn claim_settlement(&mut self, kind: SettlementKind, now: DateTime<Utc>) -> Result<(), Error> {
        if let Some(existing) = &self.settlement_claim {
            return Err(Error::invalid_state_transition(format!(
                "a {} settlement is in progress",
                existing.kind.as_str()
            )));
        }
        self.settlement_claim = Some(SettlementClaim {
            kind,
            claimed_at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Drop the settlement claim without changing status.
    pub fn release_settlement_claim(&mut self, now: DateTime<Utc>) {
        self.settlement_claim = None;
        self.updated_at = now;
    }

    /// Record the gateway authorization returned by a capture.
    pub fn record_authorization(&mut self, authorization: AuthorizationId) {
        self.authorization_id = Some(authorization);
    }
}
