//! Per-node attempt counters.

use std::collections::BTreeMap;

use bulwark_types::resilience::{AttemptOutcome, ExecutionAttempt, NodeAttemptCounts};
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct AttemptMetrics {
    counts: DashMap<String, NodeAttemptCounts>,
}

impl AttemptMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self, attempt: &ExecutionAttempt) {
        let mut counts = self.counts.entry(attempt.node_id.clone()).or_default();
        counts.attempts += 1;
        match attempt.outcome {
            AttemptOutcome::Success => counts.successes += 1,
            AttemptOutcome::RetryableFailure | AttemptOutcome::TerminalFailure => {
                counts.failures += 1
            }
        }
    }

    pub fn record_rejection(&self, node_id: &str) {
        self.counts.entry(node_id.to_string()).or_default().rejections += 1;
    }

    pub fn get(&self, node_id: &str) -> NodeAttemptCounts {
        self.counts.get(node_id).map(|c| *c).unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, NodeAttemptCounts> {
        self.counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}
