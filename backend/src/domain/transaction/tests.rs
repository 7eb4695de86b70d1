//! State machine coverage: legality, actor rules and derived fields.

use std::collections::{HashSet, VecDeque};

use chrono::{Duration, TimeZone};
use rstest::{fixture, rstest};

use super::machine::{apply, is_permitted, plan, settlement_for, target_status, TransitionPlan};
use super::*;
use crate::domain::{ErrorCode, Rating, ReviewDraft};

struct Parties {
    buyer: UserId,
    seller: UserId,
}

#[fixture]
fn parties() -> Parties {
    Parties {
        buyer: UserId::random(),
        seller: UserId::random(),
    }
}

#[fixture]
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn new_transaction(parties: &Parties, now: DateTime<Utc>) -> Transaction {
    Transaction::create(
        NewTransaction {
            buyer_id: parties.buyer.clone(),
            seller_id: parties.seller.clone(),
            listing_id: ListingId::new(Uuid::new_v4()),
            amount: 4_200,
        },
        now,
    )
    .expect("valid transaction")
}

/// Plan and apply an action, standing in for the payment gateway.
fn step(
    txn: &mut Transaction,
    actor: &Actor,
    action: TransactionAction,
    now: DateTime<Utc>,
) -> Result<TransitionPlan, Error> {
    let planned = plan(txn, actor, &action)?;
    if planned == TransitionPlan::Unchanged {
        return Ok(planned);
    }
    if planned == TransitionPlan::Settle(SettlementKind::Capture) {
        txn.record_authorization(AuthorizationId::new("auth-1"));
    }
    apply(txn, actor, &action, now)?;
    Ok(planned)
}

fn buyer(parties: &Parties) -> Actor {
    Actor::User(parties.buyer.clone())
}

fn seller(parties: &Parties) -> Actor {
    Actor::User(parties.seller.clone())
}

fn scheduled(parties: &Parties, now: DateTime<Utc>, meetup_in: Duration) -> Transaction {
    let mut txn = new_transaction(parties, now);
    step(&mut txn, &buyer(parties), TransactionAction::SubmitDeposit, now).expect("submit");
    step(&mut txn, &seller(parties), TransactionAction::AcceptDeposit, now).expect("accept");
    step(
        &mut txn,
        &buyer(parties),
        TransactionAction::ScheduleMeetup {
            meetup_at: now + meetup_in,
        },
        now,
    )
    .expect("schedule");
    txn
}

fn transaction_in(status: TransactionStatus, parties: &Parties, now: DateTime<Utc>) -> Transaction {
    let mut parts = new_transaction(parties, now).into_parts();
    parts.status = status;
    if status == TransactionStatus::Disputed {
        parts.dispute = Some(Dispute {
            raised_by: PartyRole::Buyer,
            reason: "item damaged".to_owned(),
            raised_at: now,
            timing_at_raise: CancellationTiming::Unscheduled,
            outcome: None,
            resolved_by: None,
        });
    }
    Transaction::from_parts(parts)
}

fn sample_action(kind: ActionKind, now: DateTime<Utc>) -> TransactionAction {
    match kind {
        ActionKind::SubmitDeposit => TransactionAction::SubmitDeposit,
        ActionKind::AcceptDeposit => TransactionAction::AcceptDeposit,
        ActionKind::RejectDeposit => TransactionAction::RejectDeposit { reason: None },
        ActionKind::ScheduleMeetup => TransactionAction::ScheduleMeetup {
            meetup_at: now + Duration::days(1),
        },
        ActionKind::StartMeetup => TransactionAction::StartMeetup,
        ActionKind::Complete => TransactionAction::Complete { review: None },
        ActionKind::Cancel => TransactionAction::Cancel {
            reason: "changed plans".to_owned(),
        },
        ActionKind::Refund => TransactionAction::Refund {
            reason: "changed plans".to_owned(),
        },
        ActionKind::RaiseDispute => TransactionAction::RaiseDispute {
            reason: "no show".to_owned(),
        },
        ActionKind::ResolveDispute => TransactionAction::ResolveDispute {
            outcome: DisputeOutcome::Split,
        },
    }
}

fn legal_actor(kind: ActionKind, parties: &Parties) -> Actor {
    match kind {
        ActionKind::AcceptDeposit | ActionKind::RejectDeposit => seller(parties),
        ActionKind::ResolveDispute => Actor::User(UserId::random()),
        _ => buyer(parties),
    }
}

const ALL_KINDS: [ActionKind; 10] = [
    ActionKind::SubmitDeposit,
    ActionKind::AcceptDeposit,
    ActionKind::RejectDeposit,
    ActionKind::ScheduleMeetup,
    ActionKind::StartMeetup,
    ActionKind::Complete,
    ActionKind::Cancel,
    ActionKind::Refund,
    ActionKind::RaiseDispute,
    ActionKind::ResolveDispute,
];

#[rstest]
#[case(0)]
#[case(-5)]
fn create_rejects_non_positive_amounts(parties: Parties, now: DateTime<Utc>, #[case] amount: i64) {
    let err = Transaction::create(
        NewTransaction {
            buyer_id: parties.buyer.clone(),
            seller_id: parties.seller.clone(),
            listing_id: ListingId::new(Uuid::new_v4()),
            amount,
        },
        now,
    )
    .expect_err("non-positive amount");
    assert_eq!(err.code(), ErrorCode::InvalidRequest);
}

#[rstest]
fn create_rejects_self_dealing(parties: Parties, now: DateTime<Utc>) {
    let err = Transaction::create(
        NewTransaction {
            buyer_id: parties.buyer.clone(),
            seller_id: parties.buyer.clone(),
            listing_id: ListingId::new(Uuid::new_v4()),
            amount: 100,
        },
        now,
    )
    .expect_err("buyer == seller");
    assert_eq!(err.code(), ErrorCode::InvalidRequest);
}

#[rstest]
fn happy_path_reaches_completed(parties: Parties, now: DateTime<Utc>) {
    let mut txn = scheduled(&parties, now, Duration::hours(30));
    assert_eq!(txn.status(), TransactionStatus::MeetupScheduled);
    assert_eq!(txn.authorization_id(), Some(&AuthorizationId::new("auth-1")));

    step(&mut txn, &seller(&parties), TransactionAction::StartMeetup, now).expect("start");
    let planned = step(
        &mut txn,
        &buyer(&parties),
        TransactionAction::Complete { review: None },
        now,
    )
    .expect("complete");
    assert_eq!(planned, TransitionPlan::Settle(SettlementKind::Release));
    assert_eq!(txn.status(), TransactionStatus::Completed);
}

#[rstest]
fn every_illegal_pair_is_rejected_without_mutation(parties: Parties, now: DateTime<Utc>) {
    for status in TransactionStatus::ALL {
        for kind in ALL_KINDS {
            if is_permitted(kind, status)
                || (kind == ActionKind::Complete && status == TransactionStatus::Completed)
            {
                continue;
            }
            let txn = transaction_in(status, &parties, now);
            let actor = legal_actor(kind, &parties);
            let action = sample_action(kind, now);

            let planned = plan(&txn, &actor, &action).expect_err("illegal plan");
            assert_eq!(
                planned.code(),
                ErrorCode::InvalidStateTransition,
                "{kind} from {status}"
            );

            let mut copy = txn.clone();
            let applied = apply(&mut copy, &actor, &action, now).expect_err("illegal apply");
            assert_eq!(applied.code(), ErrorCode::InvalidStateTransition);
            assert_eq!(copy, txn, "{kind} from {status} must not mutate");
        }
    }
}

#[rstest]
fn completed_is_only_reachable_through_deposit_accepted() {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([(TransactionStatus::Pending, false)]);
    let now = Utc::now();

    while let Some((status, escrowed)) = queue.pop_front() {
        if !seen.insert((status, escrowed)) {
            continue;
        }
        if status == TransactionStatus::Completed {
            assert!(escrowed, "reached COMPLETED without escrow");
        }
        for kind in ALL_KINDS {
            if !is_permitted(kind, status) {
                continue;
            }
            let outcomes: Vec<TransactionAction> = match kind {
                ActionKind::ResolveDispute => vec![
                    TransactionAction::ResolveDispute {
                        outcome: DisputeOutcome::BuyerFavored,
                    },
                    TransactionAction::ResolveDispute {
                        outcome: DisputeOutcome::SellerFavored,
                    },
                ],
                other => vec![sample_action(other, now)],
            };
            for action in outcomes {
                let next = target_status(&action);
                queue.push_back((next, escrowed || next == TransactionStatus::DepositAccepted));
            }
        }
    }
    assert!(seen.contains(&(TransactionStatus::Completed, true)));
}

#[rstest]
fn terminal_statuses_have_no_outgoing_transitions() {
    for status in TransactionStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
        for kind in ALL_KINDS {
            assert!(!is_permitted(kind, status), "{kind} from {status}");
        }
    }
}

#[rstest]
fn completing_twice_is_unchanged(parties: Parties, now: DateTime<Utc>) {
    let mut txn = scheduled(&parties, now, Duration::hours(30));
    step(
        &mut txn,
        &seller(&parties),
        TransactionAction::Complete { review: None },
        now,
    )
    .expect("first completion");
    let before = txn.clone();

    let planned = step(
        &mut txn,
        &buyer(&parties),
        TransactionAction::Complete { review: None },
        now + Duration::minutes(5),
    )
    .expect("repeat completion");
    assert_eq!(planned, TransitionPlan::Unchanged);
    assert_eq!(txn, before);
}

#[rstest]
#[case(ActionKind::SubmitDeposit, TransactionStatus::Pending, true)]
#[case(ActionKind::AcceptDeposit, TransactionStatus::DepositSubmitted, false)]
#[case(ActionKind::RejectDeposit, TransactionStatus::DepositSubmitted, false)]
fn deposit_actions_are_role_bound(
    parties: Parties,
    now: DateTime<Utc>,
    #[case] kind: ActionKind,
    #[case] status: TransactionStatus,
    #[case] seller_forbidden: bool,
) {
    let txn = transaction_in(status, &parties, now);
    let wrong = if seller_forbidden {
        seller(&parties)
    } else {
        buyer(&parties)
    };
    let err = plan(&txn, &wrong, &sample_action(kind, now)).expect_err("wrong role");
    assert_eq!(err.code(), ErrorCode::InvalidRequest);
}

#[rstest]
fn outsiders_cannot_act(parties: Parties, now: DateTime<Utc>) {
    let txn = new_transaction(&parties, now);
    let outsider = Actor::User(UserId::random());
    let err = plan(&txn, &outsider, &TransactionAction::Cancel {
        reason: "x".to_owned(),
    })
    .expect_err("outsider");
    assert_eq!(err.code(), ErrorCode::InvalidRequest);
}

#[rstest]
fn system_may_only_cancel_or_refund(parties: Parties, now: DateTime<Utc>) {
    let txn = new_transaction(&parties, now);
    let submit = plan(&txn, &Actor::System, &TransactionAction::SubmitDeposit)
        .expect_err("system submit");
    assert_eq!(submit.code(), ErrorCode::InvalidRequest);

    let cancel = plan(
        &txn,
        &Actor::System,
        &TransactionAction::Cancel {
            reason: "timeout".to_owned(),
        },
    )
    .expect("system cancel");
    assert_eq!(cancel, TransitionPlan::Apply);
}

#[rstest]
fn parties_cannot_resolve_their_own_dispute(parties: Parties, now: DateTime<Utc>) {
    let txn = transaction_in(TransactionStatus::Disputed, &parties, now);
    let err = plan(
        &txn,
        &seller(&parties),
        &sample_action(ActionKind::ResolveDispute, now),
    )
    .expect_err("party adjudicator");
    assert_eq!(err.code(), ErrorCode::InvalidRequest);
}

#[rstest]
#[case(Duration::hours(1), CancellationTiming::LastMinute, true)]
#[case(Duration::hours(5), CancellationTiming::SameDay, false)]
#[case(Duration::hours(100), CancellationTiming::WellInAdvance, false)]
fn cancellation_stamps_timing(
    parties: Parties,
    now: DateTime<Utc>,
    #[case] lead: Duration,
    #[case] tier: CancellationTiming,
    #[case] last_minute: bool,
) {
    let mut txn = scheduled(&parties, now, lead + Duration::minutes(10));
    let cancel_at = now + Duration::minutes(10);
    let planned = step(
        &mut txn,
        &seller(&parties),
        TransactionAction::Cancel {
            reason: "sold elsewhere".to_owned(),
        },
        cancel_at,
    )
    .expect("cancel");

    assert_eq!(planned, TransitionPlan::Settle(SettlementKind::Refund));
    assert_eq!(txn.status(), TransactionStatus::Cancelled);
    let cancellation = txn.cancellation().expect("cancellation recorded");
    assert_eq!(cancellation.by, CancelledBy::Seller);
    assert_eq!(cancellation.timing, tier);
    assert_eq!(txn.is_last_minute_cancellation(), last_minute);
}

#[rstest]
fn pending_cancel_needs_no_refund(parties: Parties, now: DateTime<Utc>) {
    let mut txn = new_transaction(&parties, now);
    let planned = step(
        &mut txn,
        &buyer(&parties),
        TransactionAction::Refund {
            reason: String::new(),
        },
        now,
    )
    .expect("refund");
    assert_eq!(planned, TransitionPlan::Apply);
    assert_eq!(txn.status(), TransactionStatus::Refunded);
    let cancellation = txn.cancellation().expect("stamped");
    assert_eq!(cancellation.timing, CancellationTiming::Unscheduled);
    assert!(cancellation.reason.is_none());
}

#[rstest]
fn disputed_transactions_cannot_be_cancelled(parties: Parties, now: DateTime<Utc>) {
    let mut txn = scheduled(&parties, now, Duration::hours(10));
    step(
        &mut txn,
        &buyer(&parties),
        TransactionAction::RaiseDispute {
            reason: "wrong item".to_owned(),
        },
        now,
    )
    .expect("dispute");
    let err = plan(
        &txn,
        &buyer(&parties),
        &TransactionAction::Cancel {
            reason: "x".to_owned(),
        },
    )
    .expect_err("cancel disputed");
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
}

#[rstest]
#[case(DisputeOutcome::BuyerFavored, TransactionStatus::Refunded, false, true)]
#[case(DisputeOutcome::SellerFavored, TransactionStatus::Completed, false, false)]
#[case(DisputeOutcome::Split, TransactionStatus::Refunded, true, false)]
fn dispute_resolution_maps_outcomes(
    parties: Parties,
    now: DateTime<Utc>,
    #[case] outcome: DisputeOutcome,
    #[case] status: TransactionStatus,
    #[case] partial: bool,
    #[case] seller_cancelled: bool,
) {
    let mut txn = scheduled(&parties, now, Duration::hours(1) + Duration::minutes(30));
    step(
        &mut txn,
        &buyer(&parties),
        TransactionAction::RaiseDispute {
            reason: "seller no-show".to_owned(),
        },
        now,
    )
    .expect("dispute");
    let adjudicator = UserId::random();
    step(
        &mut txn,
        &Actor::User(adjudicator.clone()),
        TransactionAction::ResolveDispute { outcome },
        now + Duration::days(2),
    )
    .expect("resolve");

    assert_eq!(txn.status(), status);
    assert_eq!(txn.partial_refund(), partial);
    assert_eq!(txn.dispute_outcome(), Some(outcome));
    assert_eq!(
        txn.dispute().and_then(|d| d.resolved_by.clone()),
        Some(adjudicator)
    );
    let cancellation = txn.cancellation();
    assert_eq!(cancellation.is_some(), seller_cancelled);
    if let Some(c) = cancellation {
        assert_eq!(c.by, CancelledBy::Seller);
        assert_eq!(c.timing, CancellationTiming::LastMinute);
    }
}

#[rstest]
fn settlement_claim_blocks_other_transitions(parties: Parties, now: DateTime<Utc>) {
    let mut txn = scheduled(&parties, now, Duration::hours(10));
    txn.claim_settlement(SettlementKind::Release, now)
        .expect("first claim");

    let err = plan(
        &txn,
        &Actor::System,
        &TransactionAction::Cancel {
            reason: "timeout".to_owned(),
        },
    )
    .expect_err("claimed");
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
    assert!(txn.claim_settlement(SettlementKind::Refund, now).is_err());

    apply(
        &mut txn,
        &buyer(&parties),
        &TransactionAction::Complete { review: None },
        now,
    )
    .expect("claim holder applies");
    assert!(txn.settlement_claim().is_none());
}

#[rstest]
fn manual_review_blocks_money_movement(parties: Parties, now: DateTime<Utc>) {
    let mut txn = scheduled(&parties, now, Duration::hours(10));
    txn.flag_for_manual_review("release failed", now);

    let err = plan(
        &txn,
        &buyer(&parties),
        &TransactionAction::Complete { review: None },
    )
    .expect_err("flagged");
    assert_eq!(err.code(), ErrorCode::InvalidStateTransition);

    let start = plan(&txn, &buyer(&parties), &TransactionAction::StartMeetup)
        .expect("non-payment action allowed");
    assert_eq!(start, TransitionPlan::Apply);
}

#[rstest]
fn meetup_must_be_in_the_future(parties: Parties, now: DateTime<Utc>) {
    let mut txn = new_transaction(&parties, now);
    step(&mut txn, &buyer(&parties), TransactionAction::SubmitDeposit, now).expect("submit");
    step(&mut txn, &seller(&parties), TransactionAction::AcceptDeposit, now).expect("accept");
    let err = step(
        &mut txn,
        &buyer(&parties),
        TransactionAction::ScheduleMeetup {
            meetup_at: now - Duration::hours(1),
        },
        now,
    )
    .expect_err("past meetup");
    assert_eq!(err.code(), ErrorCode::InvalidRequest);
    assert_eq!(txn.status(), TransactionStatus::DepositAccepted);
}

#[rstest]
fn completion_review_is_carried_but_not_required_for_settlement(
    parties: Parties,
    now: DateTime<Utc>,
) {
    let txn = scheduled(&parties, now, Duration::hours(10));
    let action = TransactionAction::Complete {
        review: Some(ReviewDraft {
            rating: Rating::new(9).expect("valid rating"),
            comment: None,
        }),
    };
    assert_eq!(settlement_for(&txn, &action), Some(SettlementKind::Release));
}
