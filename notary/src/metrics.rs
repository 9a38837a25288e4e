//! Metrics collection for notary monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Notary metrics.
pub struct Metrics {
    /// Total submissions received.
    pub submissions_total: AtomicU64,
    /// Transactions committed.
    pub transactions_committed: AtomicU64,
    /// Re-submissions of already committed transactions.
    pub duplicate_submissions: AtomicU64,
    /// Submissions rejected because an input was already consumed.
    pub double_spends_rejected: AtomicU64,
    /// Submissions rejected for bad signatures or contract violations.
    pub invalid_rejected: AtomicU64,
    /// States consumed.
    pub states_consumed: AtomicU64,
    /// Deliveries to participants that failed or timed out.
    pub distributions_failed: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            submissions_total: AtomicU64::new(0),
            transactions_committed: AtomicU64::new(0),
            duplicate_submissions: AtomicU64::new(0),
            double_spends_rejected: AtomicU64::new(0),
            invalid_rejected: AtomicU64::new(0),
            states_consumed: AtomicU64::new(0),
            distributions_failed: AtomicU64::new(0),
        }
    }

    /// Increment submissions received.
    pub fn submission_received(&self) {
        self.submissions_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a commit that consumed `inputs` states.
    pub fn transaction_committed(&self, inputs: usize) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        self.states_consumed.fetch_add(inputs as u64, Ordering::Relaxed);
    }

    /// Record an idempotent re-submission.
    pub fn duplicate_submission(&self) {
        self.duplicate_submissions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a double spend.
    pub fn double_spend_rejected(&self) {
        self.double_spends_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an invalid submission.
    pub fn invalid_rejected(&self) {
        self.invalid_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed delivery.
    pub fn distribution_failed(&self) {
        self.distributions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submissions_total: self.submissions_total.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            duplicate_submissions: self.duplicate_submissions.load(Ordering::Relaxed),
            double_spends_rejected: self.double_spends_rejected.load(Ordering::Relaxed),
            invalid_rejected: self.invalid_rejected.load(Ordering::Relaxed),
            states_consumed: self.states_consumed.load(Ordering::Relaxed),
            distributions_failed: self.distributions_failed.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP iou_notary_submissions_total Total number of submissions
# TYPE iou_notary_submissions_total counter
iou_notary_submissions_total {}

# HELP iou_notary_transactions_committed Total committed transactions
# TYPE iou_notary_transactions_committed counter
iou_notary_transactions_committed {}

# HELP iou_notary_duplicate_submissions Re-submissions of committed transactions
# TYPE iou_notary_duplicate_submissions counter
iou_notary_duplicate_submissions {}

# HELP iou_notary_double_spends_rejected Submissions rejected as double spends
# TYPE iou_notary_double_spends_rejected counter
iou_notary_double_spends_rejected {}

# HELP iou_notary_invalid_rejected Submissions rejected as invalid
# TYPE iou_notary_invalid_rejected counter
iou_notary_invalid_rejected {}

# HELP iou_notary_states_consumed Total states consumed
# TYPE iou_notary_states_consumed counter
iou_notary_states_consumed {}

# HELP iou_notary_distributions_failed Failed deliveries to participants
# TYPE iou_notary_distributions_failed counter
iou_notary_distributions_failed {}
"#,
            snapshot.submissions_total,
            snapshot.transactions_committed,
            snapshot.duplicate_submissions,
            snapshot.double_spends_rejected,
            snapshot.invalid_rejected,
            snapshot.states_consumed,
            snapshot.distributions_failed,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub submissions_total: u64,
    pub transactions_committed: u64,
    pub duplicate_submissions: u64,
    pub double_spends_rejected: u64,
    pub invalid_rejected: u64,
    pub states_consumed: u64,
    pub distributions_failed: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.submission_received();
        metrics.submission_received();
        metrics.transaction_committed(3);
        metrics.double_spend_rejected();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.submissions_total, 2);
        assert_eq!(snapshot.transactions_committed, 1);
        assert_eq!(snapshot.states_consumed, 3);
        assert_eq!(snapshot.double_spends_rejected, 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.submission_received();

        let output = metrics.to_prometheus();
        assert!(output.contains("iou_notary_submissions_total 1"));
    }
}
