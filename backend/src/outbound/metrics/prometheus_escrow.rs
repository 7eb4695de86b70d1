//! Prometheus adapter for escrow outcome counters.
//!
//! Counters are registered with a caller-supplied registry; exposing the
//! registry over HTTP is the host process's concern.

use async_trait::async_trait;
use prometheus::{CounterVec, Opts, Registry};

use crate::domain::ports::{AdjustmentResult, EscrowMetrics, EscrowMetricsError};
use crate::domain::{ActionKind, SettlementKind, TransactionStatus};

/// Prometheus-backed escrow metrics recorder.
///
/// # Exported series
///
/// - `escrow_transitions_total{action, status}`: successful transitions.
/// - `escrow_reputation_adjustments_total{result}`: `applied` or `duplicate`.
/// - `escrow_payment_failures_total{settlement}`: settlements that exhausted
///   their retry budget.
pub struct PrometheusEscrowMetrics {
    transitions_total: CounterVec,
    adjustments_total: CounterVec,
    payment_failures_total: CounterVec,
}

fn counter(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<CounterVec, prometheus::Error> {
    let counter = CounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl PrometheusEscrowMetrics {
    /// Create and register the counters.
    ///
    /// # Errors
    ///
    /// Returns an error if a counter with the same name is already registered.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            transitions_total: counter(
                registry,
                "escrow_transitions_total",
                "Escrow transitions by action and resulting status",
                &["action", "status"],
            )?,
            adjustments_total: counter(
                registry,
                "escrow_reputation_adjustments_total",
                "Keyed reputation deltas by result",
                &["result"],
            )?,
            payment_failures_total: counter(
                registry,
                "escrow_payment_failures_total",
                "Settlements abandoned after exhausting retries",
                &["settlement"],
            )?,
        })
    }
}

#[async_trait]
impl EscrowMetrics for PrometheusEscrowMetrics {
    async fn record_transition(
        &self,
        action: ActionKind,
        status: TransactionStatus,
    ) -> Result<(), EscrowMetricsError> {
        self.transitions_total
            .with_label_values(&[action.as_str(), status.as_str()])
            .inc();
        Ok(())
    }

    async fn record_adjustment(&self, result: AdjustmentResult) -> Result<(), EscrowMetricsError> {
        let label = match result {
            AdjustmentResult::Applied => "applied",
            AdjustmentResult::Duplicate => "duplicate",
        };
        self.adjustments_total.with_label_values(&[label]).inc();
        Ok(())
    }

    async fn record_payment_failure(
        &self,
        kind: SettlementKind,
    ) -> Result<(), EscrowMetricsError> {
        self.payment_failures_total
            .with_label_values(&[kind.as_str()])
            .inc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> (Registry, PrometheusEscrowMetrics) {
        let registry = Registry::new();
        let metrics =
            PrometheusEscrowMetrics::new(&registry).expect("metric registration should succeed");
        (registry, metrics)
    }

    #[test]
    fn registers_all_counters() {
        let (registry, metrics) = metrics();
        metrics
            .transitions_total
            .with_label_values(&["complete", "COMPLETED"])
            .inc();
        metrics.adjustments_total.with_label_values(&["applied"]).inc();
        metrics
            .payment_failures_total
            .with_label_values(&["release"])
            .inc();

        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|family| family.name().to_owned())
            .collect();
        for expected in [
            "escrow_transitions_total",
            "escrow_reputation_adjustments_total",
            "escrow_payment_failures_total",
        ] {
            assert!(names.iter().any(|name| name == expected), "{expected}");
        }
    }

    #[test]
    fn double_registration_fails() {
        let (registry, _metrics) = metrics();
        assert!(PrometheusEscrowMetrics::new(&registry).is_err());
    }

    #[tokio::test]
    async fn transitions_are_labelled_by_action_and_status() {
        let (_registry, metrics) = metrics();
        metrics
            .record_transition(ActionKind::Cancel, TransactionStatus::Cancelled)
            .await
            .expect("recording should succeed");
        metrics
            .record_transition(ActionKind::Cancel, TransactionStatus::Cancelled)
            .await
            .expect("recording should succeed");

        let counter = metrics
            .transitions_total
            .with_label_values(&["cancel", "CANCELLED"]);
        assert_eq!(counter.get() as u64, 2);
    }

    #[tokio::test]
    async fn duplicates_and_failures_are_counted_separately() {
        let (_registry, metrics) = metrics();
        metrics
            .record_adjustment(AdjustmentResult::Duplicate)
            .await
            .expect("recording should succeed");
        metrics
            .record_payment_failure(SettlementKind::Refund)
            .await
            .expect("recording should succeed");

        assert_eq!(
            metrics
                .adjustments_total
                .with_label_values(&["duplicate"])
                .get() as u64,
            1
        );
        assert_eq!(
            metrics
                .adjustments_total
                .with_label_values(&["applied"])
                .get() as u64,
            0
        );
        assert_eq!(
            metrics
                .payment_failures_total
                .with_label_values(&["refund"])
                .get() as u64,
            1
        );
    }
}
