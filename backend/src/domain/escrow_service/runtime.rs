//! Port and runtime dependency bundles for the escrow service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::ports::{
    EscrowMetrics, NotificationDispatcher, PaymentGateway, ReviewRepository,
    TransactionRepository, UserStatisticsRepository,
};

use super::{BackoffJitter, SettlementSleeper};

/// Port bundle required by the escrow service.
pub struct EscrowServicePorts {
    /// Transaction persistence with optimistic versioning.
    pub transactions: Arc<dyn TransactionRepository>,
    /// Per-user statistics with keyed deltas.
    pub statistics: Arc<dyn UserStatisticsRepository>,
    /// Review persistence.
    pub reviews: Arc<dyn ReviewRepository>,
    /// Outbound payment gateway.
    pub payments: Arc<dyn PaymentGateway>,
    /// Event sink.
    pub notifications: Arc<dyn NotificationDispatcher>,
    /// Outcome counters.
    pub metrics: Arc<dyn EscrowMetrics>,
}

impl EscrowServicePorts {
    /// Build a strongly-typed port bundle.
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        statistics: Arc<dyn UserStatisticsRepository>,
        reviews: Arc<dyn ReviewRepository>,
        payments: Arc<dyn PaymentGateway>,
        notifications: Arc<dyn NotificationDispatcher>,
        metrics: Arc<dyn EscrowMetrics>,
    ) -> Self {
        Self {
            transactions,
            statistics,
            reviews,
            payments,
            notifications,
            metrics,
        }
    }
}

/// Runtime helpers used by the payment retry policy.
pub struct EscrowServiceRuntime {
    /// Async sleep implementation.
    pub sleeper: Arc<dyn SettlementSleeper>,
    /// Jitter strategy for retry delays.
    pub jitter: Arc<dyn BackoffJitter>,
}

impl Default for EscrowServiceRuntime {
    fn default() -> Self {
        Self {
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(AttemptJitter),
        }
    }
}

/// Tokio-based sleeper implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl SettlementSleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Default jitter: adds up to a quarter of the base delay, seeded from the
/// clock's sub-second nanos and the attempt number.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttemptJitter;

impl BackoffJitter for AttemptJitter {
    fn jittered_delay(&self, base: Duration, attempt: u32, now: DateTime<Utc>) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let max_extra = (base_ms / 4).max(1);
        let seed = u64::from(now.timestamp_subsec_nanos()) ^ u64::from(attempt);
        let extra = seed % (max_extra.saturating_add(1));
        Duration::from_millis(base_ms.saturating_add(extra))
    }
}
