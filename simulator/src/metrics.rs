//! Simulation metrics.

use std::collections::{BTreeMap, VecDeque};

use iou_common::FlowKind;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total flows attempted.
    pub total_flows: u64,
    /// Flows that reached finality.
    pub successful_flows: u64,
    /// Flows that failed.
    pub failed_flows: u64,
    /// Completed flows per kind.
    pub completed_by_kind: BTreeMap<String, u64>,
    /// Failures per error code.
    pub failures_by_code: BTreeMap<String, u64>,
    /// Latency samples (ms).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_flows: 0,
            successful_flows: 0,
            failed_flows: 0,
            completed_by_kind: BTreeMap::new(),
            failures_by_code: BTreeMap::new(),
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a finalized flow.
    pub fn record_success(&mut self, kind: FlowKind, latency_ms: u64) {
        self.total_flows += 1;
        self.successful_flows += 1;
        *self.completed_by_kind.entry(kind.to_string()).or_default() += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Record a failed flow.
    pub fn record_failure(&mut self, code: &str) {
        self.total_flows += 1;
        self.failed_flows += 1;
        *self.failures_by_code.entry(code.to_string()).or_default() += 1;
    }

    /// Get average latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p50 latency.
    pub fn p50_latency_ms(&self) -> u64 {
        self.percentile_latency(50)
    }

    /// Get p99 latency.
    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_flows == 0 {
            return 0.0;
        }

        self.successful_flows as f64 / self.total_flows as f64
    }

    /// Get throughput (flows per second).
    pub fn throughput(&self, duration_secs: u64) -> f64 {
        if duration_secs == 0 {
            return 0.0;
        }

        self.total_flows as f64 / duration_secs as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
