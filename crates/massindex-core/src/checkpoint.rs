//! Checkpoint frequency

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::CheckpointConfigError;

/// Running step metrics a worker reports to the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricKind {
    ReadCount,
    WriteCount,
    CommitCount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepMetrics {
    values: BTreeMap<MetricKind, u64>,
}

impl StepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics of a step that has read `read_count` items so far
    pub fn with_read_count(read_count: u64) -> Self {
        let mut metrics = Self::new();
        metrics.set(MetricKind::ReadCount, read_count);
        metrics
    }

    pub fn get(&self, kind: MetricKind) -> Option<u64> {
        self.values.get(&kind).copied()
    }

    pub fn set(&mut self, kind: MetricKind, value: u64) {
        self.values.insert(kind, value);
    }

    pub fn increment(&mut self, kind: MetricKind) -> u64 {
        let value = self.values.entry(kind).or_default();
        *value += 1;
        *value
    }
}

/// Decides when a worker persists its checkpoint: every `item_count` items read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
    item_count: u64,
}

impl CheckpointPolicy {
    pub fn new(item_count: u64) -> Result<Self, CheckpointConfigError> {
        if item_count == 0 {
            return Err(CheckpointConfigError::ZeroItemCount);
        }
        Ok(Self { item_count })
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    /// True exactly when the read count is a positive multiple of the item count
    pub fn is_ready_to_checkpoint(&self, metrics: &StepMetrics) -> Result<bool, CheckpointConfigError> {
        let read_count = metrics
            .get(MetricKind::ReadCount)
            .ok_or(CheckpointConfigError::MissingReadCount)?;
        Ok(read_count > 0 && read_count % self.item_count == 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_at_multiples_only() {
        let policy = CheckpointPolicy::new(3).unwrap();
        let ready: Vec<u64> = (0..=10)
            .filter(|n| policy.is_ready_to_checkpoint(&StepMetrics::with_read_count(*n)).unwrap())
            .collect();
        assert_eq!(ready, vec![3, 6, 9]);
    }

    #[test]
    fn test_missing_read_count_is_fatal() {
        let policy = CheckpointPolicy::new(3).unwrap();
        let mut metrics = StepMetrics::new();
        metrics.set(MetricKind::WriteCount, 3);
        assert_eq!(
            policy.is_ready_to_checkpoint(&metrics),
            Err(CheckpointConfigError::MissingReadCount)
        );
    }

    #[test]
    fn test_zero_item_count_is_rejected() {
        assert_eq!(CheckpointPolicy::new(0), Err(CheckpointConfigError::ZeroItemCount));
    }

    #[test]
    fn test_increment() {
        let mut metrics = StepMetrics::new();
        assert_eq!(metrics.increment(MetricKind::ReadCount), 1);
        assert_eq!(metrics.increment(MetricKind::ReadCount), 2);
        assert_eq!(metrics.get(MetricKind::CommitCount), None);
    }
}
