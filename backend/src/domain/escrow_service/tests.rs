//! Service-level tests over the in-memory store and scripted gateway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use mockable::Clock;
use rstest::{fixture, rstest};
use serde_json::json;

use super::*;

use crate::domain::ports::{
    MockTransactionRepository, NoOpEscrowMetrics, PaymentGatewayError, TransactionRepository,
    UserStatisticsRepositoryError,
};
use crate::domain::{
    AdjustmentKey, AuthorizationId, CancellationTiming, CancelledBy, DisputeOutcome, ReviewDraft,
    SettlementKind, StatisticsDelta, SweepReport, TieredTrustPolicy,
};
use crate::outbound::memory::InMemoryEscrowStore;
use crate::test_support::escrow::{
    EscrowHarness, ImmediateSleeper, MutableClock, NoJitter, PaymentCall, RecordingNotifier,
    ScriptedPaymentGateway,
};

#[fixture]
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0)
        .single()
        .expect("valid time")
}

#[fixture]
fn harness(now: DateTime<Utc>) -> EscrowHarness {
    EscrowHarness::new(now)
}

fn complete() -> TransactionAction {
    TransactionAction::Complete { review: None }
}

async fn stats(harness: &EscrowHarness, user: &UserId) -> UserStatistics {
    harness
        .service
        .get_user_statistics(user)
        .await
        .expect("statistics")
}

/// Statistics store that fails its first `failures` delta writes.
struct FlakyStatistics {
    inner: Arc<InMemoryEscrowStore>,
    failures_left: AtomicUsize,
}

#[async_trait]
impl UserStatisticsRepository for FlakyStatistics {
    async fn load(
        &self,
        user_id: &UserId,
    ) -> Result<UserStatistics, UserStatisticsRepositoryError> {
        UserStatisticsRepository::load(self.inner.as_ref(), user_id).await
    }

    async fn apply_delta(
        &self,
        user_id: &UserId,
        delta: &StatisticsDelta,
        key: &AdjustmentKey,
    ) -> Result<DeltaApplication, UserStatisticsRepositoryError> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(UserStatisticsRepositoryError::connection("blip"));
        }
        self.inner.apply_delta(user_id, delta, key).await
    }
}

/// A second service over the harness's store whose statistics writes fail
/// `failures` times first.
fn service_with_flaky_statistics(harness: &EscrowHarness, failures: usize) -> EscrowService {
    let statistics = FlakyStatistics {
        inner: harness.store.clone(),
        failures_left: AtomicUsize::new(failures),
    };
    EscrowService::with_runtime(
        EscrowServicePorts::new(
            harness.store.clone(),
            Arc::new(statistics),
            harness.store.clone(),
            harness.payments.clone(),
            harness.notifier.clone(),
            Arc::new(NoOpEscrowMetrics),
        ),
        harness.clock.clone(),
        Arc::new(TieredTrustPolicy::default()),
        EscrowServiceRuntime {
            sleeper: Arc::new(ImmediateSleeper),
            jitter: Arc::new(NoJitter),
        },
        EscrowServiceConfig::default(),
    )
}

#[rstest]
#[tokio::test]
async fn happy_path_releases_funds_once_and_rewards_both_parties(harness: EscrowHarness) {
    let scheduled = harness.scheduled(5_000, TimeDelta::hours(30)).await;
    let started = harness
        .act(scheduled.id(), harness.seller_actor(), TransactionAction::StartMeetup)
        .await;
    assert_eq!(started.status(), TransactionStatus::InProgress);

    let done = harness
        .act(scheduled.id(), harness.buyer_actor(), complete())
        .await;

    assert_eq!(done.status(), TransactionStatus::Completed);
    assert!(done.settlement_claim().is_none());
    assert!(done.reputation_settled_at().is_some());
    assert_eq!(harness.payments.call_count(SettlementKind::Capture), 1);
    assert_eq!(harness.payments.call_count(SettlementKind::Release), 1);
    assert_eq!(harness.payments.call_count(SettlementKind::Refund), 0);

    for user in [&harness.buyer, &harness.seller] {
        let snapshot = stats(&harness, user).await;
        assert_eq!(snapshot.completed_transactions, 1);
        assert_eq!(snapshot.trust_score, 51);
    }
    assert_eq!(
        harness.notifier.labels(),
        vec![
            "created",
            "deposit_submitted",
            "deposit_accepted",
            "meetup_scheduled",
            "meetup_started",
            "completed",
        ]
    );
}

#[rstest]
#[tokio::test]
async fn repeated_completion_is_idempotent(harness: EscrowHarness) {
    let scheduled = harness.scheduled(1_000, TimeDelta::hours(2)).await;
    let first = harness
        .act(scheduled.id(), harness.buyer_actor(), complete())
        .await;
    let second = harness
        .act(scheduled.id(), harness.seller_actor(), complete())
        .await;

    assert_eq!(first, second);
    assert_eq!(harness.payments.call_count(SettlementKind::Release), 1);
    assert_eq!(stats(&harness, &harness.seller).await.completed_transactions, 1);
}

#[rstest]
#[tokio::test]
async fn redelivered_terminal_outcome_counts_once(harness: EscrowHarness) {
    let scheduled = harness.scheduled(1_000, TimeDelta::hours(10)).await;
    let done = harness
        .act(scheduled.id(), harness.buyer_actor(), complete())
        .await;

    // Pretend the stamp was lost after the deltas landed.
    let mut parts = done.clone().into_parts();
    parts.reputation_settled_at = None;
    let unstamped = Transaction::from_parts(parts);
    harness
        .store
        .save(&unstamped, done.version())
        .await
        .expect("unstamp");

    let report = harness.service.sweep(harness.clock.utc()).await.expect("sweep");
    assert_eq!(report.reputation_redriven, 1);
    for user in [&harness.buyer, &harness.seller] {
        let snapshot = stats(&harness, user).await;
        assert_eq!(snapshot.completed_transactions, 1);
        assert_eq!(snapshot.trust_score, 51);
    }
    let reloaded = harness
        .service
        .get_transaction(done.id())
        .await
        .expect("reload");
    assert!(reloaded.reputation_settled_at().is_some());
}

#[rstest]
#[tokio::test]
async fn concurrent_cancel_and_complete_settle_exactly_once(harness: EscrowHarness) {
    let scheduled = harness.scheduled(2_000, TimeDelta::hours(1)).await;
    let id = scheduled.id();

    let (cancelled, completed) = tokio::join!(
        harness.service.transition(
            id,
            harness.buyer_actor(),
            TransactionAction::Cancel {
                reason: "changed my mind".into(),
            },
        ),
        harness.service.transition(id, harness.seller_actor(), complete()),
    );

    let outcomes = [&cancelled, &completed];
    let winners = outcomes.iter().filter(|result| result.is_ok()).count();
    assert_eq!(winners, 1, "cancel={cancelled:?} complete={completed:?}");
    for result in outcomes {
        if let Err(error) = result {
            assert!(matches!(
                error.code(),
                ErrorCode::InvalidStateTransition | ErrorCode::VersionConflict
            ));
        }
    }

    let moved = harness.payments.call_count(SettlementKind::Release)
        + harness.payments.call_count(SettlementKind::Refund);
    assert_eq!(moved, 1);

    let stored = harness.service.get_transaction(id).await.expect("reload");
    assert!(matches!(
        stored.status(),
        TransactionStatus::Cancelled | TransactionStatus::Completed
    ));
    assert!(stored.settlement_claim().is_none());
}

#[rstest]
#[tokio::test]
async fn exhausted_release_retries_flag_and_keep_state(harness: EscrowHarness) {
    let scheduled = harness.scheduled(4_000, TimeDelta::hours(3)).await;
    harness.payments.fail_times(
        SettlementKind::Release,
        3,
        &PaymentGatewayError::timeout("gateway did not answer"),
    );

    let error = harness
        .service
        .transition(scheduled.id(), harness.buyer_actor(), complete())
        .await
        .expect_err("release should fail");

    assert_eq!(error.code(), ErrorCode::ExternalServiceError);
    let details = error.details().expect("details");
    assert_eq!(details["attempts"], json!(3));
    assert_eq!(details["flaggedForManualReview"], json!(true));
    assert_eq!(
        harness.sleeper.recorded(),
        vec![Duration::from_millis(200), Duration::from_millis(400)]
    );

    let stored = harness
        .service
        .get_transaction(scheduled.id())
        .await
        .expect("reload");
    assert_eq!(stored.status(), TransactionStatus::MeetupScheduled);
    assert!(stored.settlement_claim().is_none());
    assert!(stored.manual_review().is_some());
    assert!(
        harness
            .notifier
            .labels()
            .contains(&"flagged_for_manual_review")
    );

    let retry = harness
        .service
        .transition(scheduled.id(), harness.buyer_actor(), complete())
        .await
        .expect_err("flagged transaction blocks payment");
    assert_eq!(retry.code(), ErrorCode::InvalidStateTransition);
    assert_eq!(harness.payments.call_count(SettlementKind::Release), 3);
}

#[rstest]
#[tokio::test]
async fn transient_failure_within_budget_still_completes(harness: EscrowHarness) {
    let scheduled = harness.scheduled(4_000, TimeDelta::hours(3)).await;
    harness.payments.fail_next(
        SettlementKind::Release,
        PaymentGatewayError::rate_limited("slow down"),
    );

    let done = harness
        .act(scheduled.id(), harness.buyer_actor(), complete())
        .await;

    assert_eq!(done.status(), TransactionStatus::Completed);
    assert!(done.manual_review().is_none());
    assert_eq!(harness.payments.call_count(SettlementKind::Release), 2);
}

#[rstest]
#[tokio::test]
async fn rejected_capture_is_not_flagged_and_can_be_retried(harness: EscrowHarness) {
    let opened = harness.open(700).await;
    harness
        .act(opened.id(), harness.buyer_actor(), TransactionAction::SubmitDeposit)
        .await;
    harness.payments.fail_next(
        SettlementKind::Capture,
        PaymentGatewayError::rejected("card declined"),
    );

    let error = harness
        .service
        .transition(opened.id(), harness.seller_actor(), TransactionAction::AcceptDeposit)
        .await
        .expect_err("capture rejected");
    assert_eq!(error.code(), ErrorCode::ExternalServiceError);
    assert!(harness.sleeper.recorded().is_empty());

    let stored = harness
        .service
        .get_transaction(opened.id())
        .await
        .expect("reload");
    assert_eq!(stored.status(), TransactionStatus::DepositSubmitted);
    assert!(stored.manual_review().is_none());
    assert!(stored.settlement_claim().is_none());

    let accepted = harness
        .act(opened.id(), harness.seller_actor(), TransactionAction::AcceptDeposit)
        .await;
    assert_eq!(accepted.status(), TransactionStatus::DepositAccepted);
    assert!(accepted.authorization_id().is_some());
}

#[rstest]
#[tokio::test]
async fn last_minute_seller_cancellation_refunds_and_penalises(harness: EscrowHarness) {
    let scheduled = harness.scheduled(3_000, TimeDelta::hours(1)).await;
    let cancelled = harness
        .act(
            scheduled.id(),
            harness.seller_actor(),
            TransactionAction::Cancel {
                reason: "double booked".into(),
            },
        )
        .await;

    let cancellation = cancelled.cancellation().expect("cancellation");
    assert_eq!(cancellation.by, CancelledBy::Seller);
    assert_eq!(cancellation.timing, CancellationTiming::LastMinute);
    assert_eq!(harness.payments.call_count(SettlementKind::Refund), 1);

    let seller = stats(&harness, &harness.seller).await;
    assert_eq!(seller.cancellations, 1);
    assert_eq!(seller.last_minute_cancels_as_seller, 1);
    assert_eq!(seller.trust_score, 35);
    let buyer = stats(&harness, &harness.buyer).await;
    assert_eq!(buyer, UserStatistics::new(harness.buyer.clone()));
}

#[rstest]
#[tokio::test]
async fn split_dispute_refunds_half_without_penalty(harness: EscrowHarness) {
    let scheduled = harness.scheduled(1_001, TimeDelta::hours(40)).await;
    harness
        .act(
            scheduled.id(),
            harness.buyer_actor(),
            TransactionAction::RaiseDispute {
                reason: "item damaged".into(),
            },
        )
        .await;

    let resolved = harness
        .act(
            scheduled.id(),
            Actor::User(UserId::random()),
            TransactionAction::ResolveDispute {
                outcome: DisputeOutcome::Split,
            },
        )
        .await;

    assert_eq!(resolved.status(), TransactionStatus::Refunded);
    assert!(resolved.partial_refund());
    let authorization = AuthorizationId::new(format!("auth-{}", scheduled.id()));
    assert_eq!(
        harness.payments.calls(),
        vec![
            PaymentCall::Capture {
                transaction_id: scheduled.id(),
                amount: 1_001,
            },
            PaymentCall::Refund {
                authorization: authorization.clone(),
                amount: 500,
            },
            PaymentCall::Release {
                authorization,
                amount: 501,
            },
        ]
    );
    for user in [&harness.buyer, &harness.seller] {
        assert_eq!(stats(&harness, user).await.trust_score, 50);
    }
}

#[rstest]
#[tokio::test]
async fn split_release_failure_after_refund_is_flagged_not_repeated(harness: EscrowHarness) {
    let scheduled = harness.scheduled(1_000, TimeDelta::hours(40)).await;
    harness
        .act(
            scheduled.id(),
            harness.buyer_actor(),
            TransactionAction::RaiseDispute {
                reason: "item damaged".into(),
            },
        )
        .await;
    harness.payments.fail_times(
        SettlementKind::Release,
        3,
        &PaymentGatewayError::transport("connection reset"),
    );
    let adjudicator = Actor::User(UserId::random());
    let split = TransactionAction::ResolveDispute {
        outcome: DisputeOutcome::Split,
    };

    let error = harness
        .service
        .transition(scheduled.id(), adjudicator.clone(), split.clone())
        .await
        .expect_err("release exhausted");
    assert_eq!(error.code(), ErrorCode::ExternalServiceError);
    let details = error.details().expect("details");
    assert_eq!(details.get("completedPayments"), Some(&json!(1)));
    assert_eq!(details.get("flaggedForManualReview"), Some(&json!(true)));

    let stored = harness
        .service
        .get_transaction(scheduled.id())
        .await
        .expect("reload");
    assert_eq!(stored.status(), TransactionStatus::Disputed);
    assert!(stored.manual_review().is_some());
    assert!(stored.settlement_claim().is_none());

    let retry = harness
        .service
        .transition(scheduled.id(), adjudicator, split)
        .await
        .expect_err("flagged transactions block payments");
    assert_eq!(retry.code(), ErrorCode::InvalidStateTransition);
    assert_eq!(harness.payments.call_count(SettlementKind::Refund), 1);
    assert_eq!(harness.payments.call_count(SettlementKind::Release), 3);
}

#[rstest]
#[tokio::test]
async fn buyer_favoured_dispute_penalises_seller_at_raise_tier(harness: EscrowHarness) {
    let scheduled = harness.scheduled(1_000, TimeDelta::hours(5)).await;
    harness
        .act(
            scheduled.id(),
            harness.buyer_actor(),
            TransactionAction::RaiseDispute {
                reason: "seller vanished".into(),
            },
        )
        .await;
    harness.clock.advance_hours(48);

    harness
        .act(
            scheduled.id(),
            Actor::User(UserId::random()),
            TransactionAction::ResolveDispute {
                outcome: DisputeOutcome::BuyerFavored,
            },
        )
        .await;

    let seller = stats(&harness, &harness.seller).await;
    assert_eq!(seller.cancellations, 1);
    // same-day tier (8) plus dispute loss (10)
    assert_eq!(seller.trust_score, 32);
    assert_eq!(stats(&harness, &harness.buyer).await.trust_score, 50);
}

#[rstest]
#[tokio::test]
async fn reviews_average_into_the_rated_user(harness: EscrowHarness) {
    for rating in [8, 10, 6] {
        let scheduled = harness.scheduled(100, TimeDelta::hours(12)).await;
        harness
            .act(scheduled.id(), harness.seller_actor(), complete())
            .await;
        harness
            .service
            .submit_review(scheduled.id(), harness.buyer.clone(), rating, None)
            .await
            .expect("review");
    }

    let seller = stats(&harness, &harness.seller).await;
    assert_eq!(seller.rating_count, 3);
    assert!((seller.average_rating - 8.0).abs() < f64::EPSILON);
    assert_eq!(stats(&harness, &harness.buyer).await.rating_count, 0);
}

#[rstest]
#[tokio::test]
async fn completion_may_carry_a_review(harness: EscrowHarness) {
    let scheduled = harness.scheduled(100, TimeDelta::hours(12)).await;
    let review = ReviewDraft {
        rating: Rating::new(9).expect("rating"),
        comment: Some("smooth handover".into()),
    };
    harness
        .act(
            scheduled.id(),
            harness.buyer_actor(),
            TransactionAction::Complete {
                review: Some(review),
            },
        )
        .await;

    let seller = stats(&harness, &harness.seller).await;
    assert_eq!(seller.rating_count, 1);
    assert!((seller.average_rating - 9.0).abs() < f64::EPSILON);

    let duplicate = harness
        .service
        .submit_review(scheduled.id(), harness.buyer.clone(), 4, None)
        .await
        .expect_err("second review from the same rater");
    assert_eq!(duplicate.code(), ErrorCode::InvalidRequest);
}

#[rstest]
#[tokio::test]
async fn second_review_from_the_same_rater_leaves_statistics_unchanged(harness: EscrowHarness) {
    let scheduled = harness.scheduled(100, TimeDelta::hours(12)).await;
    harness
        .act(scheduled.id(), harness.seller_actor(), complete())
        .await;
    harness
        .service
        .submit_review(scheduled.id(), harness.buyer.clone(), 9, None)
        .await
        .expect("first review");
    let before = stats(&harness, &harness.seller).await;

    let error = harness
        .service
        .submit_review(scheduled.id(), harness.buyer.clone(), 2, None)
        .await
        .expect_err("second review");

    assert_eq!(error.code(), ErrorCode::InvalidRequest);
    assert_eq!(stats(&harness, &harness.seller).await, before);
    assert_eq!(before.rating_count, 1);
}

#[rstest]
#[tokio::test]
async fn review_retry_after_statistics_outage_applies_the_rating_once(harness: EscrowHarness) {
    let scheduled = harness.scheduled(400, TimeDelta::hours(12)).await;
    harness
        .act(scheduled.id(), harness.seller_actor(), complete())
        .await;
    let flaky = service_with_flaky_statistics(&harness, 1);

    let first = flaky
        .submit_review(scheduled.id(), harness.buyer.clone(), 8, Some("on time".into()))
        .await
        .expect_err("statistics outage");
    assert_eq!(first.code(), ErrorCode::ServiceUnavailable);
    assert_eq!(stats(&harness, &harness.seller).await.rating_count, 0);

    let retried = harness
        .service
        .submit_review(scheduled.id(), harness.buyer.clone(), 8, None)
        .await
        .expect("retry completes the stored review");
    assert_eq!(retried.rating.value(), 8);
    assert_eq!(retried.comment.as_deref(), Some("on time"));

    let again = harness
        .service
        .submit_review(scheduled.id(), harness.buyer.clone(), 3, None)
        .await
        .expect_err("already reviewed");
    assert_eq!(again.code(), ErrorCode::InvalidRequest);

    let seller = stats(&harness, &harness.seller).await;
    assert_eq!(seller.rating_count, 1);
    assert!((seller.average_rating - 8.0).abs() < f64::EPSILON);
    assert_eq!(
        harness
            .notifier
            .labels()
            .iter()
            .filter(|label| **label == "review_submitted")
            .count(),
        1
    );
}

#[rstest]
#[tokio::test]
async fn completion_review_lost_to_an_outage_is_redriven_by_the_sweep(harness: EscrowHarness) {
    let scheduled = harness.scheduled(400, TimeDelta::hours(12)).await;
    let flaky = service_with_flaky_statistics(&harness, 2);
    let review = ReviewDraft {
        rating: Rating::new(9).expect("rating"),
        comment: None,
    };

    let completed = flaky
        .transition(
            scheduled.id(),
            harness.buyer_actor(),
            TransactionAction::Complete {
                review: Some(review),
            },
        )
        .await
        .expect("completion survives the outage");
    assert_eq!(completed.status(), TransactionStatus::Completed);
    assert!(completed.reputation_settled_at().is_none());
    assert_eq!(stats(&harness, &harness.seller).await.rating_count, 0);

    let report = harness
        .service
        .sweep(harness.clock.utc())
        .await
        .expect("sweep");
    assert_eq!(report.reputation_redriven, 1);

    let seller = stats(&harness, &harness.seller).await;
    assert_eq!(seller.completed_transactions, 1);
    assert_eq!(seller.rating_count, 1);
    assert!((seller.average_rating - 9.0).abs() < f64::EPSILON);
    assert_eq!(seller.trust_score, 51);
}

#[rstest]
#[case(0)]
#[case(11)]
#[tokio::test]
async fn review_rating_out_of_range_is_rejected(harness: EscrowHarness, #[case] rating: i64) {
    let scheduled = harness.scheduled(100, TimeDelta::hours(12)).await;
    harness
        .act(scheduled.id(), harness.buyer_actor(), complete())
        .await;
    let error = harness
        .service
        .submit_review(scheduled.id(), harness.buyer.clone(), rating, None)
        .await
        .expect_err("out of range");
    assert_eq!(error.code(), ErrorCode::InvalidRequest);
}

#[rstest]
#[tokio::test]
async fn reviews_require_completion(harness: EscrowHarness) {
    let scheduled = harness.scheduled(100, TimeDelta::hours(12)).await;
    let error = harness
        .service
        .submit_review(scheduled.id(), harness.buyer.clone(), 7, None)
        .await
        .expect_err("not completed");
    assert_eq!(error.code(), ErrorCode::InvalidStateTransition);
}

#[rstest]
#[tokio::test]
async fn sweep_expires_pending_without_penalty(harness: EscrowHarness) {
    let opened = harness.open(250).await;
    harness.clock.advance_hours(23);
    let early = harness.service.sweep(harness.clock.utc()).await.expect("sweep");
    assert_eq!(early, SweepReport::default());

    harness.clock.advance_hours(2);
    let report = harness.service.sweep(harness.clock.utc()).await.expect("sweep");
    assert_eq!(report.expired_pending, 1);

    let stored = harness
        .service
        .get_transaction(opened.id())
        .await
        .expect("reload");
    assert_eq!(stored.status(), TransactionStatus::Cancelled);
    assert_eq!(
        stored.cancellation().map(|c| c.by),
        Some(CancelledBy::System)
    );
    for user in [&harness.buyer, &harness.seller] {
        assert_eq!(stats(&harness, user).await.cancellations, 0);
    }

    let rerun = harness.service.sweep(harness.clock.utc()).await.expect("sweep");
    assert_eq!(rerun, SweepReport::default());
}

#[rstest]
#[tokio::test]
async fn sweep_expires_unanswered_deposits(harness: EscrowHarness) {
    let opened = harness.open(250).await;
    harness
        .act(opened.id(), harness.buyer_actor(), TransactionAction::SubmitDeposit)
        .await;
    harness.clock.advance_hours(49);

    let report = harness.service.sweep(harness.clock.utc()).await.expect("sweep");
    assert_eq!(report.expired_deposits, 1);
    assert!(harness.payments.calls().is_empty());
    let stored = harness
        .service
        .get_transaction(opened.id())
        .await
        .expect("reload");
    assert_eq!(stored.status(), TransactionStatus::Cancelled);
}

#[rstest]
#[tokio::test]
async fn sweep_flags_stale_claims_once(harness: EscrowHarness) {
    let scheduled = harness.scheduled(900, TimeDelta::hours(6)).await;
    let mut claimed = scheduled.clone();
    claimed
        .claim_settlement(SettlementKind::Release, harness.clock.utc())
        .expect("claim");
    harness
        .store
        .save(&claimed, scheduled.version())
        .await
        .expect("save claim");

    harness.clock.advance(Duration::from_secs(10 * 60));
    let fresh = harness.service.sweep(harness.clock.utc()).await.expect("sweep");
    assert_eq!(fresh.flagged_stale_claims, 0);

    harness.clock.advance(Duration::from_secs(6 * 60));
    let report = harness.service.sweep(harness.clock.utc()).await.expect("sweep");
    assert_eq!(report.flagged_stale_claims, 1);

    let stored = harness
        .service
        .get_transaction(scheduled.id())
        .await
        .expect("reload");
    assert!(stored.manual_review().is_some());
    assert_eq!(stored.status(), TransactionStatus::MeetupScheduled);

    let rerun = harness.service.sweep(harness.clock.utc()).await.expect("sweep");
    assert_eq!(rerun.flagged_stale_claims, 0);
    assert_eq!(rerun.skipped_flagged, 1);
}

#[rstest]
#[tokio::test]
async fn sweep_redrives_unsettled_reputation(harness: EscrowHarness) {
    let scheduled = harness.scheduled(900, TimeDelta::hours(6)).await;
    let mut done = scheduled.clone();
    machine::apply(
        &mut done,
        &harness.buyer_actor(),
        &complete(),
        harness.clock.utc(),
    )
    .expect("apply");
    harness
        .store
        .save(&done, scheduled.version())
        .await
        .expect("save");

    let report = harness.service.sweep(harness.clock.utc()).await.expect("sweep");
    assert_eq!(report.reputation_redriven, 1);
    assert_eq!(stats(&harness, &harness.buyer).await.completed_transactions, 1);

    let rerun = harness.service.sweep(harness.clock.utc()).await.expect("sweep");
    assert_eq!(rerun.reputation_redriven, 0);
    assert_eq!(stats(&harness, &harness.buyer).await.completed_transactions, 1);
}

#[rstest]
#[tokio::test]
async fn notifier_failures_do_not_fail_operations(harness: EscrowHarness) {
    harness.notifier.fail_all();
    let scheduled = harness.scheduled(900, TimeDelta::hours(6)).await;
    let done = harness
        .act(scheduled.id(), harness.buyer_actor(), complete())
        .await;
    assert_eq!(done.status(), TransactionStatus::Completed);
    assert!(harness.notifier.events().is_empty());
}

#[rstest]
#[tokio::test]
async fn unknown_transactions_are_not_found(harness: EscrowHarness) {
    let error = harness
        .service
        .transition(
            TransactionId::random(),
            harness.buyer_actor(),
            TransactionAction::SubmitDeposit,
        )
        .await
        .expect_err("missing");
    assert_eq!(error.code(), ErrorCode::NotFound);
}

#[rstest]
#[tokio::test]
async fn invalid_requests_leave_the_record_untouched(harness: EscrowHarness) {
    let opened = harness.open(900).await;
    let error = harness
        .service
        .transition(opened.id(), harness.seller_actor(), TransactionAction::SubmitDeposit)
        .await
        .expect_err("seller cannot submit the deposit");
    assert_eq!(error.code(), ErrorCode::InvalidRequest);

    let stored = harness
        .service
        .get_transaction(opened.id())
        .await
        .expect("reload");
    assert_eq!(stored, opened);
}

#[rstest]
#[tokio::test]
async fn create_rejects_self_dealing(harness: EscrowHarness) {
    let error = harness
        .service
        .create_transaction(
            harness.buyer.clone(),
            harness.buyer.clone(),
            ListingId::new(uuid::Uuid::new_v4()),
            100,
        )
        .await
        .expect_err("same party");
    assert_eq!(error.code(), ErrorCode::InvalidRequest);
}

#[rstest]
#[tokio::test]
async fn conflict_retries_let_a_dispute_land_beside_a_start(now: DateTime<Utc>) {
    let config = EscrowServiceConfig {
        version_conflict_retries: 2,
        ..EscrowServiceConfig::default()
    };
    let harness = EscrowHarness::with_config(now, config);
    let scheduled = harness.scheduled(900, TimeDelta::hours(6)).await;

    let (started, raised) = tokio::join!(
        harness
            .service
            .transition(scheduled.id(), harness.seller_actor(), TransactionAction::StartMeetup),
        harness.service.transition(
            scheduled.id(),
            harness.buyer_actor(),
            TransactionAction::RaiseDispute {
                reason: "wrong item".into(),
            },
        ),
    );

    // A dispute is legal from both MEETUP_SCHEDULED and IN_PROGRESS.
    let raised = raised.expect("dispute");
    assert_eq!(raised.status(), TransactionStatus::Disputed);
    if let Err(error) = started {
        assert_eq!(error.code(), ErrorCode::InvalidStateTransition);
    }
}

#[rstest]
#[tokio::test]
async fn repository_outage_maps_to_service_unavailable(now: DateTime<Utc>) {
    let mut transactions = MockTransactionRepository::new();
    transactions.expect_load().returning(|_| {
        Err(crate::domain::ports::TransactionRepositoryError::connection(
            "pool exhausted",
        ))
    });
    let store = Arc::new(InMemoryEscrowStore::new());
    let service = EscrowService::with_runtime(
        EscrowServicePorts::new(
            Arc::new(transactions),
            store.clone(),
            store,
            Arc::new(ScriptedPaymentGateway::default()),
            Arc::new(RecordingNotifier::default()),
            Arc::new(NoOpEscrowMetrics),
        ),
        Arc::new(MutableClock::new(now)),
        Arc::new(TieredTrustPolicy::default()),
        EscrowServiceRuntime {
            sleeper: Arc::new(ImmediateSleeper),
            jitter: Arc::new(NoJitter),
        },
        EscrowServiceConfig::default(),
    );

    let error = service
        .get_transaction(TransactionId::random())
        .await
        .expect_err("outage");
    assert_eq!(error.code(), ErrorCode::ServiceUnavailable);
}

#[rstest]
fn retry_policy_backs_off_exponentially_with_a_cap() {
    let policy = RetryPolicy {
        max_attempts: 10,
        initial_backoff: Duration::from_millis(200),
        max_backoff: Duration::from_secs(1),
    };
    let delays: Vec<_> = (1..=5).map(|attempt| policy.base_delay(attempt)).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(800),
            Duration::from_secs(1),
            Duration::from_secs(1),
        ]
    );
}
