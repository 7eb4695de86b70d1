//! Money movement under a settlement claim.
//!
//! The claim is written before the gateway is called, so a concurrent
//! transition sees it and fails instead of starting a second payment. After
//! the call the outcome is written and the claim dropped in the same save.
//! A claim whose owner crashed is left for the sweep to flag.

use serde_json::json;
use tracing::{error, info, warn};

use crate::domain::machine;
use crate::domain::ports::{PaymentGatewayError, PaymentReceipt, TransactionRepositoryError};
use crate::domain::{
    Actor, AuthorizationId, DisputeOutcome, Error, EscrowEvent, SettlementKind, Transaction,
    TransactionAction,
};

use super::{map_transaction_repository_error, EscrowService};

/// Successful gateway result.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SettlementOutcome {
    Captured(AuthorizationId),
    Moved(Vec<PaymentReceipt>),
}

/// One gateway call within a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaymentStep {
    Capture(i64),
    Release(i64),
    Refund(i64),
}

impl PaymentStep {
    fn amount(self) -> i64 {
        match self {
            Self::Capture(amount) | Self::Release(amount) | Self::Refund(amount) => amount,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Capture(_) => SettlementKind::Capture.as_str(),
            Self::Release(_) => SettlementKind::Release.as_str(),
            Self::Refund(_) => SettlementKind::Refund.as_str(),
        }
    }
}

/// Gateway calls owed for a settlement, in order.
///
/// A split dispute refunds half to the buyer, rounded down, and releases the
/// rest to the seller, so the whole authorization is always paid out.
/// Zero-amount calls are never sent.
fn payment_steps(
    transaction: &Transaction,
    kind: SettlementKind,
    action: &TransactionAction,
) -> Vec<PaymentStep> {
    let amount = transaction.amount();
    let steps = match (kind, action) {
        (SettlementKind::Capture, _) => vec![PaymentStep::Capture(amount)],
        (
            _,
            TransactionAction::ResolveDispute {
                outcome: DisputeOutcome::Split,
            },
        ) => {
            let buyer_share = amount / 2;
            vec![
                PaymentStep::Refund(buyer_share),
                PaymentStep::Release(amount - buyer_share),
            ]
        }
        (SettlementKind::Release, _) => vec![PaymentStep::Release(amount)],
        (SettlementKind::Refund, _) => vec![PaymentStep::Refund(amount)],
    };
    steps.into_iter().filter(|step| step.amount() > 0).collect()
}

fn captured_authorization(
    transaction: &Transaction,
) -> Result<&AuthorizationId, PaymentGatewayError> {
    transaction.authorization_id().ok_or_else(|| {
        PaymentGatewayError::rejected("no captured authorization to settle against")
    })
}

/// Result of a single gateway call.
enum StepResult {
    Captured(AuthorizationId),
    Moved(PaymentReceipt),
}

/// A step that exhausted its retry budget.
struct StepFailure {
    attempts: u32,
    completed_steps: usize,
    error: PaymentGatewayError,
}

impl EscrowService {
    /// Run the payment for a claimed transaction and apply `action`.
    pub(super) async fn settle(
        &self,
        claimed: Transaction,
        kind: SettlementKind,
        actor: &Actor,
        action: &TransactionAction,
    ) -> Result<Transaction, Error> {
        match self.run_payment_steps(&claimed, kind, action).await {
            Ok(outcome) => self.finish_settlement(claimed, kind, outcome, actor, action).await,
            Err(failure) => self.abandon_settlement(claimed, kind, &failure).await,
        }
    }

    async fn run_payment_steps(
        &self,
        transaction: &Transaction,
        kind: SettlementKind,
        action: &TransactionAction,
    ) -> Result<SettlementOutcome, StepFailure> {
        let mut receipts = Vec::new();
        for (completed_steps, step) in payment_steps(transaction, kind, action)
            .into_iter()
            .enumerate()
        {
            match self.call_with_retries(transaction, step).await {
                Ok(StepResult::Captured(authorization)) => {
                    return Ok(SettlementOutcome::Captured(authorization));
                }
                Ok(StepResult::Moved(receipt)) => receipts.push(receipt),
                Err((attempts, error)) => {
                    return Err(StepFailure {
                        attempts,
                        completed_steps,
                        error,
                    });
                }
            }
        }
        Ok(SettlementOutcome::Moved(receipts))
    }

    async fn call_with_retries(
        &self,
        transaction: &Transaction,
        step: PaymentStep,
    ) -> Result<StepResult, (u32, PaymentGatewayError)> {
        let retry = self.config.payment_retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.call_gateway(transaction, step).await {
                Ok(outcome) => return Ok(outcome),
                Err(failure) if failure.is_retryable() && attempt < max_attempts => {
                    warn!(
                        transaction_id = %transaction.id(),
                        settlement = step.label(),
                        amount = step.amount(),
                        attempt,
                        error = %failure,
                        "payment call failed; retrying"
                    );
                    let delay = self
                        .jitter
                        .jittered_delay(retry.base_delay(attempt), attempt, self.clock.utc());
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => return Err((attempt, failure)),
            }
        }
    }

    async fn call_gateway(
        &self,
        transaction: &Transaction,
        step: PaymentStep,
    ) -> Result<StepResult, PaymentGatewayError> {
        let receipt = match step {
            PaymentStep::Capture(amount) => {
                return self
                    .payments
                    .capture_deposit(&transaction.id(), amount)
                    .await
                    .map(StepResult::Captured);
            }
            PaymentStep::Release(amount) => {
                self.payments
                    .release(captured_authorization(transaction)?, amount)
                    .await?
            }
            PaymentStep::Refund(amount) => {
                self.payments
                    .refund(captured_authorization(transaction)?, amount)
                    .await?
            }
        };
        Ok(StepResult::Moved(receipt))
    }

    async fn finish_settlement(
        &self,
        claimed: Transaction,
        kind: SettlementKind,
        outcome: SettlementOutcome,
        actor: &Actor,
        action: &TransactionAction,
    ) -> Result<Transaction, Error> {
        if let SettlementOutcome::Moved(receipts) = &outcome {
            for receipt in receipts {
                info!(
                    transaction_id = %claimed.id(),
                    settlement = kind.as_str(),
                    reference = %receipt.reference,
                    "funds moved"
                );
            }
        }

        let rounds = self.config.version_conflict_retries.saturating_add(1);
        let mut base = claimed;
        for _ in 0..rounds {
            let mut next = base.clone();
            if let SettlementOutcome::Captured(authorization) = &outcome {
                next.record_authorization(authorization.clone());
            }
            machine::apply(&mut next, actor, action, self.clock.utc())?;

            match self.transactions.save(&next, base.version()).await {
                Ok(saved) => return self.after_transition(saved, actor, action).await,
                Err(TransactionRepositoryError::VersionConflict { .. }) => {
                    // Only the sweep touches a claimed record; reload and keep our claim.
                    base = self.load_existing(&base.id()).await?;
                    if base.settlement_claim().map(|claim| claim.kind) != Some(kind) {
                        error!(
                            transaction_id = %base.id(),
                            settlement = kind.as_str(),
                            "settlement claim vanished after funds moved"
                        );
                        return Err(Error::internal(
                            "settlement claim lost after the payment completed",
                        ));
                    }
                }
                Err(failure) => {
                    error!(
                        transaction_id = %base.id(),
                        settlement = kind.as_str(),
                        error = %failure,
                        "funds moved but outcome was not recorded; claim left for the sweep"
                    );
                    return Err(map_transaction_repository_error(failure));
                }
            }
        }
        Err(Error::version_conflict(
            "transaction was modified concurrently; retry budget exhausted",
        ))
    }

    /// Drop the claim and, where funds may be in an unknown state, flag the
    /// transaction. The status is left as it was.
    async fn abandon_settlement(
        &self,
        claimed: Transaction,
        kind: SettlementKind,
        failure: &StepFailure,
    ) -> Result<Transaction, Error> {
        let attempts = failure.attempts;
        let flag = failure.error.is_retryable()
            || kind != SettlementKind::Capture
            || failure.completed_steps > 0;
        let reason = format!(
            "{} failed after {attempts} attempt(s) with {} earlier payment(s) completed: {}",
            kind.as_str(),
            failure.completed_steps,
            failure.error
        );
        warn!(
            transaction_id = %claimed.id(),
            settlement = kind.as_str(),
            attempts,
            completed_steps = failure.completed_steps,
            error = %failure.error,
            flagged = flag,
            "payment settlement abandoned"
        );
        let _ = self.metrics.record_payment_failure(kind).await;

        let id = claimed.id();
        let cleared = self
            .update_transaction(claimed, |txn, now| {
                if txn.settlement_claim().is_none() {
                    return false;
                }
                txn.release_settlement_claim(now);
                if flag {
                    txn.flag_for_manual_review(reason.as_str(), now);
                }
                true
            })
            .await;
        if let Err(write_error) = &cleared {
            error!(
                transaction_id = %id,
                error = %write_error,
                "could not clear settlement claim; the sweep will flag it"
            );
        } else if flag {
            self.emit(EscrowEvent::flagged(id, &reason, self.clock.utc()))
                .await;
        }

        Err(Error::external_service(format!(
            "payment {} failed; the transaction was left unchanged",
            kind.as_str()
        ))
        .with_details(json!({
            "transactionId": id,
            "settlement": kind.as_str(),
            "attempts": attempts,
            "completedPayments": failure.completed_steps,
            "flaggedForManualReview": flag,
        })))
    }
}
