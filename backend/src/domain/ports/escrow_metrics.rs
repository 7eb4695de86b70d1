//! Domain port surface for escrow outcome counters.
//!
//! Keeps observability at the domain boundary so a Prometheus adapter can
//! count transitions without the service knowing about exporters.

use async_trait::async_trait;

use crate::domain::{ActionKind, SettlementKind, TransactionStatus};

use super::define_port_error;

define_port_error! {
    /// Errors exposed when recording escrow metrics.
    pub enum EscrowMetricsError {
        /// Metric exporter rejected the write.
        Export { message: String } =>
            "escrow metrics exporter failed: {message}",
    }
}

/// How a keyed reputation delta was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentResult {
    /// Delta applied.
    Applied,
    /// Marker already present; nothing changed.
    Duplicate,
}

/// Metrics recording port for escrow counters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EscrowMetrics: Send + Sync {
    /// Count a successful transition.
    async fn record_transition(
        &self,
        action: ActionKind,
        status: TransactionStatus,
    ) -> Result<(), EscrowMetricsError>;

    /// Count a reputation delta.
    async fn record_adjustment(&self, result: AdjustmentResult) -> Result<(), EscrowMetricsError>;

    /// Count a settlement that exhausted its retry budget.
    async fn record_payment_failure(
        &self,
        kind: SettlementKind,
    ) -> Result<(), EscrowMetricsError>;
}

/// No-op implementation used when metrics are disabled or in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEscrowMetrics;

#[async_trait]
impl EscrowMetrics for NoOpEscrowMetrics {
    async fn record_transition(
        &self,
        _action: ActionKind,
        _status: TransactionStatus,
    ) -> Result<(), EscrowMetricsError> {
        Ok(())
    }

    async fn record_adjustment(&self, _result: AdjustmentResult) -> Result<(), EscrowMetricsError> {
        Ok(())
    }

    async fn record_payment_failure(
        &self,
        _kind: SettlementKind,
    ) -> Result<(), EscrowMetricsError> {
        Ok(())
    }
}
