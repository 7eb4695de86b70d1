//! Escrow orchestration service.
//!
//! Composes the state machine, the payment gateway and the reputation engine
//! behind the operations driving adapters call. Every transaction write uses
//! the repository's optimistic version check; conflicts reload and retry a
//! bounded number of times. Payment calls happen between two writes, guarded
//! by a settlement claim (see `settlement`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;
use tracing::{debug, info, warn};

use crate::domain::machine::{self, TransitionPlan};
use crate::domain::ports::{
    AdjustmentResult, DeltaApplication, EscrowMetrics, NotificationDispatcher, PaymentGateway,
    ReviewRepository, ReviewRepositoryError, TransactionRepository, TransactionRepositoryError,
    UserStatisticsRepository,
};
use crate::domain::{
    classify_cancellation, outcome_adjustments, review_adjustment, Actor, CancellationTiming,
    Error, ErrorCode, EscrowEvent, ListingId, NewTransaction, PartyRole, Rating, Review,
    ReviewDraft, Transaction, TransactionAction, TransactionId, TransactionStatus, TrustPolicy,
    UserAdjustment, UserId, UserStatistics,
};

mod mapping;
mod runtime;
mod settlement;
mod sweep;

use mapping::{
    map_review_repository_error, map_statistics_repository_error,
    map_transaction_repository_error,
};
pub use runtime::{AttemptJitter, EscrowServicePorts, EscrowServiceRuntime, TokioSleeper};
pub use sweep::{SweepPolicy, SweepReport};

/// Retry budget for payment gateway calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts per gateway call, including the first one.
    pub max_attempts: u32,
    /// Initial retry backoff.
    pub initial_backoff: Duration,
    /// Maximum retry backoff cap.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry number `attempt`, capped at `max_backoff`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let base_ms = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(u64::from(exponent)).min(max_ms))
    }
}

/// Service configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EscrowServiceConfig {
    /// Payment retry budget.
    pub payment_retry: RetryPolicy,
    /// Extra reload-and-retry rounds after an optimistic version conflict.
    pub version_conflict_retries: u32,
    /// Deadline sweep thresholds.
    pub sweep: SweepPolicy,
}

/// Async clock-independent sleeping abstraction for retries.
#[async_trait]
pub trait SettlementSleeper: Send + Sync {
    /// Suspend execution for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Retry backoff jitter abstraction.
pub trait BackoffJitter: Send + Sync {
    /// Return a jittered delay from the exponential base delay.
    ///
    /// ```rust
    /// use escrow_backend::domain::BackoffJitter;
    /// use chrono::{TimeZone, Utc};
    /// use std::time::Duration;
    /// struct DeterministicJitter;
    /// impl BackoffJitter for DeterministicJitter {
    ///     fn jittered_delay(&self, base: Duration, attempt: u32, _now: chrono::DateTime<chrono::Utc>) -> Duration {
    ///         base + Duration::from_millis(u64::from(attempt) * 5)
    ///     }
    /// }
    /// let now = Utc.with_ymd_and_hms(2026, 2, 26, 12, 0, 0).single().expect("valid time");
    /// let delay = DeterministicJitter.jittered_delay(Duration::from_millis(100), 2, now);
    /// assert_eq!(delay, Duration::from_millis(110));
    /// ```
    fn jittered_delay(&self, base: Duration, attempt: u32, now: DateTime<Utc>) -> Duration;
}

/// Domain-owned escrow service.
pub struct EscrowService {
    transactions: Arc<dyn TransactionRepository>,
    statistics: Arc<dyn UserStatisticsRepository>,
    reviews: Arc<dyn ReviewRepository>,
    payments: Arc<dyn PaymentGateway>,
    notifications: Arc<dyn NotificationDispatcher>,
    metrics: Arc<dyn EscrowMetrics>,
    clock: Arc<dyn Clock>,
    policy: Arc<dyn TrustPolicy>,
    sleeper: Arc<dyn SettlementSleeper>,
    jitter: Arc<dyn BackoffJitter>,
    config: EscrowServiceConfig,
}

impl EscrowService {
    /// Build a service using default runtime dependencies.
    /// ```rust,ignore
    /// let service = EscrowService::new(ports, clock, policy, config);
    /// ```
    pub fn new(
        ports: EscrowServicePorts,
        clock: Arc<dyn Clock>,
        policy: Arc<dyn TrustPolicy>,
        config: EscrowServiceConfig,
    ) -> Self {
        Self::with_runtime(ports, clock, policy, EscrowServiceRuntime::default(), config)
    }

    /// Build a service with injected runtime abstractions.
    pub fn with_runtime(
        ports: EscrowServicePorts,
        clock: Arc<dyn Clock>,
        policy: Arc<dyn TrustPolicy>,
        runtime: EscrowServiceRuntime,
        config: EscrowServiceConfig,
    ) -> Self {
        Self {
            transactions: ports.transactions,
            statistics: ports.statistics,
            reviews: ports.reviews,
            payments: ports.payments,
            notifications: ports.notifications,
            metrics: ports.metrics,
            clock,
            policy,
            sleeper: runtime.sleeper,
            jitter: runtime.jitter,
            config,
        }
    }

    /// Open a new transaction in `PENDING`.
    pub async fn create_transaction(
        &self,
        buyer_id: UserId,
        seller_id: UserId,
        listing_id: ListingId,
        amount: i64,
    ) -> Result<Transaction, Error> {
        let transaction = Transaction::create(
            NewTransaction {
                buyer_id,
                seller_id,
                listing_id,
                amount,
            },
            self.clock.utc(),
        )?;
        self.transactions
            .insert(&transaction)
            .await
            .map_err(map_transaction_repository_error)?;

        info!(
            transaction_id = %transaction.id(),
            listing_id = %transaction.listing_id(),
            amount = transaction.amount(),
            "escrow transaction created"
        );
        self.emit(EscrowEvent::created(&transaction)).await;
        Ok(transaction)
    }

    /// Fetch a transaction.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, Error> {
        self.load_existing(&id).await
    }

    /// Read-only statistics snapshot; unknown users get the zero snapshot.
    pub async fn get_user_statistics(&self, user_id: &UserId) -> Result<UserStatistics, Error> {
        self.statistics
            .load(user_id)
            .await
            .map_err(map_statistics_repository_error)
    }

    /// Classify a cancellation moment. Pure; exposed for callers that want to
    /// preview the tier before cancelling.
    pub fn classify_cancellation(
        &self,
        scheduled_meetup_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> CancellationTiming {
        classify_cancellation(scheduled_meetup_at, now)
    }

    /// Apply `action` on behalf of `actor`.
    ///
    /// Invalid requests leave the record untouched. Completing an already
    /// completed transaction returns it unchanged.
    pub async fn transition(
        &self,
        id: TransactionId,
        actor: Actor,
        action: TransactionAction,
    ) -> Result<Transaction, Error> {
        self.run_transition(id, &actor, &action, None).await
    }

    /// Review the counterparty of a completed transaction.
    pub async fn submit_review(
        &self,
        transaction_id: TransactionId,
        rater_id: UserId,
        rating: i64,
        comment: Option<String>,
    ) -> Result<Review, Error> {
        let rating = Rating::new(rating).map_err(|err| Error::invalid_request(err.to_string()))?;
        let transaction = self.load_existing(&transaction_id).await?;
        let role = transaction.role_of(&rater_id).ok_or_else(|| {
            Error::invalid_request("only a party to the transaction may review it")
        })?;
        if transaction.status() != TransactionStatus::Completed {
            return Err(Error::invalid_state_transition(format!(
                "reviews require a completed transaction, found {}",
                transaction.status()
            )));
        }
        self.record_review(&transaction, role, &ReviewDraft { rating, comment })
            .await
    }

    async fn run_transition(
        &self,
        id: TransactionId,
        actor: &Actor,
        action: &TransactionAction,
        expected_status: Option<TransactionStatus>,
    ) -> Result<Transaction, Error> {
        action.validate()?;
        let rounds = self.config.version_conflict_retries.saturating_add(1);

        for round in 1..=rounds {
            let current = self.load_existing(&id).await?;
            if let Some(expected) = expected_status {
                if current.status() != expected {
                    return Err(Error::invalid_state_transition(format!(
                        "status moved from {expected} to {}",
                        current.status()
                    )));
                }
            }

            let now = self.clock.utc();
            let write = match machine::plan(&current, actor, action)? {
                TransitionPlan::Unchanged => {
                    debug!(transaction_id = %id, action = %action.kind(), "repeat request ignored");
                    return Ok(current);
                }
                TransitionPlan::Apply => {
                    let mut next = current.clone();
                    machine::apply(&mut next, actor, action, now)?;
                    self.transactions.save(&next, current.version()).await
                }
                TransitionPlan::Settle(kind) => {
                    let mut claimed = current.clone();
                    claimed.claim_settlement(kind, now)?;
                    match self.transactions.save(&claimed, current.version()).await {
                        Ok(claimed) => {
                            return self.settle(claimed, kind, actor, action).await;
                        }
                        Err(error) => Err(error),
                    }
                }
            };

            match write {
                Ok(saved) => return self.after_transition(saved, actor, action).await,
                Err(TransactionRepositoryError::VersionConflict { expected }) => {
                    debug!(
                        transaction_id = %id,
                        action = %action.kind(),
                        expected_version = expected,
                        round,
                        "version conflict; reloading"
                    );
                }
                Err(error) => return Err(map_transaction_repository_error(error)),
            }
        }

        Err(Error::version_conflict(
            "transaction was modified concurrently; retry budget exhausted",
        ))
    }

    async fn after_transition(
        &self,
        saved: Transaction,
        actor: &Actor,
        action: &TransactionAction,
    ) -> Result<Transaction, Error> {
        info!(
            transaction_id = %saved.id(),
            status = %saved.status(),
            action = %action.kind(),
            actor = %actor,
            version = saved.version(),
            "transaction transitioned"
        );
        let _ = self
            .metrics
            .record_transition(action.kind(), saved.status())
            .await;
        self.emit(EscrowEvent::transitioned(&saved, action)).await;

        if let (TransactionAction::Complete { review: Some(draft) }, Some(rater)) =
            (action, actor.user_id())
        {
            if let Some(role) = saved.role_of(rater) {
                if let Err(error) = self.record_review(&saved, role, draft).await {
                    warn!(
                        transaction_id = %saved.id(),
                        code = ?error.code(),
                        %error,
                        "completion review was not stored"
                    );
                }
            }
        }

        if !saved.status().is_terminal() {
            return Ok(saved);
        }
        match self.settle_reputation(saved.clone()).await {
            Ok(settled) => Ok(settled),
            Err(error) => {
                warn!(
                    transaction_id = %saved.id(),
                    %error,
                    "reputation adjustment deferred to the sweep"
                );
                Ok(saved)
            }
        }
    }

    async fn record_review(
        &self,
        transaction: &Transaction,
        rater_role: PartyRole,
        draft: &ReviewDraft,
    ) -> Result<Review, Error> {
        let review = Review {
            transaction_id: transaction.id(),
            rater_id: transaction.party(rater_role).clone(),
            rated_id: transaction.party(rater_role.counterparty()).clone(),
            rating: draft.rating,
            comment: draft.comment.clone(),
            created_at: self.clock.utc(),
        };
        match self.reviews.insert(&review).await {
            Ok(()) => {}
            Err(duplicate @ ReviewRepositoryError::DuplicateReview { .. }) => {
                return self
                    .resume_stored_review(transaction, rater_role, duplicate)
                    .await;
            }
            Err(error) => return Err(map_review_repository_error(error)),
        }
        self.apply_adjustment(&review_adjustment(&review, rater_role))
            .await?;

        info!(
            transaction_id = %review.transaction_id,
            rated_id = %review.rated_id,
            rating = review.rating.value(),
            "review stored"
        );
        self.emit(EscrowEvent::review_submitted(&review)).await;
        Ok(review)
    }

    /// Handle a second insert for the same rater.
    ///
    /// The stored review's rating delta is keyed, so replaying it is a no-op
    /// for a genuine duplicate and completes a review whose delta failed
    /// after the row was written.
    async fn resume_stored_review(
        &self,
        transaction: &Transaction,
        rater_role: PartyRole,
        duplicate: ReviewRepositoryError,
    ) -> Result<Review, Error> {
        let rater = transaction.party(rater_role);
        let stored = self
            .reviews
            .list_for_transaction(&transaction.id())
            .await
            .map_err(map_review_repository_error)?
            .into_iter()
            .find(|review| &review.rater_id == rater);
        let Some(stored) = stored else {
            return Err(map_review_repository_error(duplicate));
        };

        match self
            .apply_adjustment(&review_adjustment(&stored, rater_role))
            .await?
        {
            AdjustmentResult::Duplicate => Err(map_review_repository_error(duplicate)),
            AdjustmentResult::Applied => {
                info!(
                    transaction_id = %stored.transaction_id,
                    rated_id = %stored.rated_id,
                    rating = stored.rating.value(),
                    "stored review rating applied on retry"
                );
                self.emit(EscrowEvent::review_submitted(&stored)).await;
                Ok(stored)
            }
        }
    }

    /// Rating deltas for every review stored on a completed transaction.
    async fn stored_review_adjustments(
        &self,
        transaction: &Transaction,
    ) -> Result<Vec<UserAdjustment>, Error> {
        if transaction.status() != TransactionStatus::Completed {
            return Ok(Vec::new());
        }
        let reviews = self
            .reviews
            .list_for_transaction(&transaction.id())
            .await
            .map_err(map_review_repository_error)?;
        Ok(reviews
            .iter()
            .filter_map(|review| {
                transaction
                    .role_of(&review.rater_id)
                    .map(|role| review_adjustment(review, role))
            })
            .collect())
    }

    /// Apply every delta owed for a terminal transaction, then stamp it.
    ///
    /// Covers the outcome and any stored reviews. Safe to repeat: keyed
    /// deltas that already landed come back as duplicates.
    async fn settle_reputation(&self, transaction: Transaction) -> Result<Transaction, Error> {
        let mut adjustments = outcome_adjustments(&transaction, self.policy.as_ref());
        adjustments.extend(self.stored_review_adjustments(&transaction).await?);
        for adjustment in &adjustments {
            self.apply_adjustment(adjustment).await?;
        }
        self.update_transaction(transaction, |txn, now| {
            if txn.reputation_settled_at().is_some() || !txn.status().is_terminal() {
                return false;
            }
            txn.mark_reputation_settled(now);
            true
        })
        .await
    }

    async fn apply_adjustment(
        &self,
        adjustment: &UserAdjustment,
    ) -> Result<AdjustmentResult, Error> {
        let applied = self
            .statistics
            .apply_delta(&adjustment.user_id, &adjustment.delta, &adjustment.key)
            .await
            .map_err(map_statistics_repository_error)?;
        let result = match applied {
            DeltaApplication::Applied(snapshot) => {
                debug!(
                    key = %adjustment.key,
                    user_id = %adjustment.user_id,
                    trust_score = snapshot.trust_score,
                    "reputation adjustment applied"
                );
                AdjustmentResult::Applied
            }
            DeltaApplication::Duplicate => {
                debug!(
                    key = %adjustment.key,
                    user_id = %adjustment.user_id,
                    "duplicate reputation adjustment ignored"
                );
                AdjustmentResult::Duplicate
            }
        };
        let _ = self.metrics.record_adjustment(result).await;
        Ok(result)
    }

    /// Version-checked read-modify-write for bookkeeping fields.
    ///
    /// `mutate` returns `false` when the reloaded record needs no write.
    async fn update_transaction<F>(
        &self,
        mut current: Transaction,
        mutate: F,
    ) -> Result<Transaction, Error>
    where
        F: Fn(&mut Transaction, DateTime<Utc>) -> bool + Send + Sync,
    {
        let rounds = self.config.version_conflict_retries.saturating_add(1);
        for _ in 0..rounds {
            let mut next = current.clone();
            if !mutate(&mut next, self.clock.utc()) {
                return Ok(current);
            }
            match self.transactions.save(&next, current.version()).await {
                Ok(saved) => return Ok(saved),
                Err(TransactionRepositoryError::VersionConflict { .. }) => {
                    current = self.load_existing(&current.id()).await?;
                }
                Err(error) => return Err(map_transaction_repository_error(error)),
            }
        }
        Err(Error::version_conflict(
            "transaction was modified concurrently; retry budget exhausted",
        ))
    }

    async fn load_existing(&self, id: &TransactionId) -> Result<Transaction, Error> {
        self.transactions
            .load(id)
            .await
            .map_err(map_transaction_repository_error)?
            .ok_or_else(|| Error::not_found(format!("transaction {id} not found")))
    }

    async fn emit(&self, event: EscrowEvent) {
        if let Err(error) = self.notifications.emit(&event).await {
            warn!(
                transaction_id = %event.transaction_id,
                event = event.kind.label(),
                %error,
                "escrow event dispatch failed"
            );
        }
    }
}

/// Whether an error only means "someone else got there first".
fn is_lost_race(error: &Error) -> bool {
    matches!(
        error.code(),
        ErrorCode::InvalidStateTransition | ErrorCode::VersionConflict
    )
}

#[cfg(test)]
mod tests;
