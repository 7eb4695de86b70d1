//! Worker configuration loaded via OrthoConfig.
//!
//! Every value is optional; unset values fall back to the service defaults.
//! Environment variables use the `ESCROW_` prefix, e.g.
//! `ESCROW_DATABASE_URL` or `ESCROW_PAYMENT_MAX_ATTEMPTS`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::{EscrowServiceConfig, RetryPolicy, SweepPolicy, TieredTrustPolicy};
use crate::outbound::persistence::PoolConfig;

const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_PAYMENT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_VERSION_CONFLICT_RETRIES: u32 = 2;

/// Configuration for the escrow worker.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "ESCROW")]
pub struct EscrowSettings {
    /// PostgreSQL URL. When unset the worker runs against the in-memory store.
    pub database_url: Option<String>,
    /// Maximum pooled connections.
    pub database_max_connections: Option<u32>,
    /// Apply embedded migrations at startup.
    #[ortho_config(default = false)]
    pub run_migrations: bool,
    /// Payment provider base URL. When unset the fixture gateway is used.
    pub payment_gateway_url: Option<String>,
    /// Bearer token for the payment provider.
    pub payment_api_key: Option<String>,
    /// Per-request payment timeout.
    pub payment_timeout_ms: Option<u64>,
    /// Gateway attempts per settlement, including the first call.
    pub payment_max_attempts: Option<u32>,
    pub payment_initial_backoff_ms: Option<u64>,
    pub payment_max_backoff_ms: Option<u64>,
    /// Reload-and-retry rounds after an optimistic version conflict.
    pub version_conflict_retries: Option<u32>,
    /// Hours a transaction may wait in `PENDING`.
    pub pending_timeout_hours: Option<i64>,
    /// Hours the seller has to accept a submitted deposit.
    pub deposit_acceptance_timeout_hours: Option<i64>,
    /// Minutes before an unfinished settlement claim is flagged.
    pub settlement_claim_ttl_minutes: Option<i64>,
    /// Seconds between sweep passes.
    pub sweep_interval_seconds: Option<u64>,
    /// Trust points removed for a last-minute or post-meetup cancellation.
    pub last_minute_penalty: Option<u32>,
    /// Trust points removed for a same-day cancellation.
    pub same_day_penalty: Option<u32>,
    /// Trust points added to each party on completion.
    pub completion_reward: Option<u32>,
    /// Extra trust points removed from the losing side of a dispute.
    pub dispute_loss_penalty: Option<u32>,
}

impl EscrowSettings {
    /// Retry budget for payment calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.payment_max_attempts.unwrap_or(defaults.max_attempts).max(1),
            initial_backoff: self
                .payment_initial_backoff_ms
                .map_or(defaults.initial_backoff, Duration::from_millis),
            max_backoff: self
                .payment_max_backoff_ms
                .map_or(defaults.max_backoff, Duration::from_millis),
        }
    }

    /// Deadline sweep thresholds.
    pub fn sweep_policy(&self) -> SweepPolicy {
        let defaults = SweepPolicy::default();
        SweepPolicy {
            pending_timeout: self
                .pending_timeout_hours
                .map_or(defaults.pending_timeout, chrono::Duration::hours),
            deposit_acceptance_timeout: self
                .deposit_acceptance_timeout_hours
                .map_or(defaults.deposit_acceptance_timeout, chrono::Duration::hours),
            settlement_claim_ttl: self
                .settlement_claim_ttl_minutes
                .map_or(defaults.settlement_claim_ttl, chrono::Duration::minutes),
        }
    }

    pub fn service_config(&self) -> EscrowServiceConfig {
        EscrowServiceConfig {
            payment_retry: self.retry_policy(),
            version_conflict_retries: self
                .version_conflict_retries
                .unwrap_or(DEFAULT_VERSION_CONFLICT_RETRIES),
            sweep: self.sweep_policy(),
        }
    }

    /// Tiered policy with any configured overrides applied.
    pub fn trust_policy(&self) -> TieredTrustPolicy {
        let mut policy = TieredTrustPolicy::default();
        if let Some(points) = self.last_minute_penalty {
            policy.last_minute = points;
            policy.after_scheduled_time = points;
        }
        if let Some(points) = self.same_day_penalty {
            policy.same_day = points;
        }
        if let Some(points) = self.completion_reward {
            policy.completion_reward = points;
        }
        if let Some(points) = self.dispute_loss_penalty {
            policy.dispute_loss = points;
        }
        policy
    }

    /// Pool settings when a database is configured.
    pub fn pool_config(&self) -> Option<PoolConfig> {
        let url = self.database_url.as_deref().filter(|url| !url.trim().is_empty())?;
        let config = PoolConfig::new(url);
        Some(match self.database_max_connections {
            Some(max) => config.with_max_size(max.max(1)),
            None => config,
        })
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_millis(self.payment_timeout_ms.unwrap_or(DEFAULT_PAYMENT_TIMEOUT_MS))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(
            self.sweep_interval_seconds
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECONDS)
                .max(1),
        )
    }
}
