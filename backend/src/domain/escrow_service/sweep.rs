//! Restart-tolerant deadline sweep.
//!
//! Replaces per-request timers: every run re-reads state, cancels what has
//! expired and re-drives reputation bookkeeping that a crash interrupted.
//! A second run over the same data changes nothing.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::domain::{
    Actor, Error, EscrowEvent, Transaction, TransactionAction, TransactionStatus,
};

use super::{is_lost_race, map_transaction_repository_error, EscrowService};

/// Time limits enforced by the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    /// How long a transaction may wait in `PENDING` for a deposit.
    pub pending_timeout: Duration,
    /// How long the seller has to accept a submitted deposit.
    pub deposit_acceptance_timeout: Duration,
    /// Age after which an unfinished settlement claim is flagged.
    pub settlement_claim_ttl: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            pending_timeout: Duration::hours(24),
            deposit_acceptance_timeout: Duration::hours(48),
            settlement_claim_ttl: Duration::minutes(15),
        }
    }
}

/// Counts from one sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending transactions cancelled for a missing deposit.
    pub expired_pending: usize,
    /// Submitted deposits cancelled after the seller never accepted.
    pub expired_deposits: usize,
    /// Settlement claims flagged after outliving their TTL.
    pub flagged_stale_claims: usize,
    /// Terminal transactions whose reputation deltas were applied again.
    pub reputation_redriven: usize,
    /// Transactions left alone because they await manual review.
    pub skipped_flagged: usize,
    /// Transactions the sweep could not process this run.
    pub failures: usize,
}

const PENDING_EXPIRED: &str = "deposit not submitted in time";
const DEPOSIT_EXPIRED: &str = "deposit acceptance timed out";

enum SweepAction {
    Expire(TransactionStatus, &'static str),
    FlagClaim,
    SkipFlagged,
    Nothing,
}

impl SweepPolicy {
    fn decide(&self, transaction: &Transaction, now: DateTime<Utc>) -> SweepAction {
        if transaction.manual_review().is_some() {
            return SweepAction::SkipFlagged;
        }
        if let Some(claim) = transaction.settlement_claim() {
            return if now - claim.claimed_at >= self.settlement_claim_ttl {
                SweepAction::FlagClaim
            } else {
                SweepAction::Nothing
            };
        }
        match transaction.status() {
            TransactionStatus::Pending
                if now - transaction.created_at() >= self.pending_timeout =>
            {
                SweepAction::Expire(TransactionStatus::Pending, PENDING_EXPIRED)
            }
            TransactionStatus::DepositSubmitted => {
                let submitted = transaction
                    .deposit_submitted_at()
                    .unwrap_or_else(|| transaction.created_at());
                if now - submitted >= self.deposit_acceptance_timeout {
                    SweepAction::Expire(TransactionStatus::DepositSubmitted, DEPOSIT_EXPIRED)
                } else {
                    SweepAction::Nothing
                }
            }
            _ => SweepAction::Nothing,
        }
    }
}

impl EscrowService {
    /// Run one sweep pass as of `now`.
    ///
    /// Listing failures abort the pass; per-transaction failures are counted
    /// in [`SweepReport::failures`] and retried on the next run.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, Error> {
        let mut report = SweepReport::default();
        let policy = self.config.sweep;

        let open = self
            .transactions
            .list_open()
            .await
            .map_err(map_transaction_repository_error)?;
        for transaction in open {
            match policy.decide(&transaction, now) {
                SweepAction::Nothing => {}
                SweepAction::SkipFlagged => report.skipped_flagged += 1,
                SweepAction::FlagClaim => match self.flag_stale_claim(transaction).await {
                    Ok(true) => report.flagged_stale_claims += 1,
                    Ok(false) => {}
                    Err(error) => {
                        warn!(%error, "could not flag stale settlement claim");
                        report.failures += 1;
                    }
                },
                SweepAction::Expire(status, reason) => {
                    match self.expire(&transaction, status, reason).await {
                        Ok(()) if status == TransactionStatus::Pending => {
                            report.expired_pending += 1;
                        }
                        Ok(()) => report.expired_deposits += 1,
                        Err(error) if is_lost_race(&error) => {
                            debug!(
                                transaction_id = %transaction.id(),
                                %error,
                                "transaction moved on before expiry"
                            );
                        }
                        Err(error) => {
                            warn!(
                                transaction_id = %transaction.id(),
                                %error,
                                "auto-cancel failed"
                            );
                            report.failures += 1;
                        }
                    }
                }
            }
        }

        let unsettled = self
            .transactions
            .list_unsettled_terminal()
            .await
            .map_err(map_transaction_repository_error)?;
        for transaction in unsettled {
            let id = transaction.id();
            match self.settle_reputation(transaction).await {
                Ok(_) => report.reputation_redriven += 1,
                Err(error) => {
                    warn!(transaction_id = %id, %error, "reputation re-drive failed");
                    report.failures += 1;
                }
            }
        }

        info!(
            expired_pending = report.expired_pending,
            expired_deposits = report.expired_deposits,
            flagged_stale_claims = report.flagged_stale_claims,
            reputation_redriven = report.reputation_redriven,
            skipped_flagged = report.skipped_flagged,
            failures = report.failures,
            "deadline sweep finished"
        );
        Ok(report)
    }

    async fn expire(
        &self,
        transaction: &Transaction,
        observed: TransactionStatus,
        reason: &str,
    ) -> Result<(), Error> {
        let action = TransactionAction::Cancel {
            reason: reason.to_owned(),
        };
        self.run_transition(transaction.id(), &Actor::System, &action, Some(observed))
            .await?;
        info!(transaction_id = %transaction.id(), reason, "transaction auto-cancelled");
        Ok(())
    }

    async fn flag_stale_claim(&self, transaction: Transaction) -> Result<bool, Error> {
        let id = transaction.id();
        let ttl = self.config.sweep.settlement_claim_ttl;
        let reason = "settlement claim expired without a recorded outcome";
        let before = transaction.version();
        let saved = self
            .update_transaction(transaction, |txn, now| {
                let stale = txn
                    .settlement_claim()
                    .is_some_and(|claim| now - claim.claimed_at >= ttl);
                if !stale || txn.manual_review().is_some() {
                    return false;
                }
                txn.flag_for_manual_review(reason, now);
                true
            })
            .await?;

        let flagged = saved.version() != before
            && saved
                .manual_review()
                .is_some_and(|flag| flag.reason == reason);
        if flagged {
            warn!(transaction_id = %id, "stale settlement claim flagged for manual review");
            self.emit(EscrowEvent::flagged(id, reason, self.clock.utc()))
                .await;
        }
        Ok(flagged)
    }
}
