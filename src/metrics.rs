//! Metrics describing the evolution of the training process.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{Pair, TokenId};

/// Reason a training run terminated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// The configured target vocabulary size was reached.
    TargetVocabReached,
    /// The configured maximum merge iterations was reached.
    MaxIterationsReached,
    /// Every working sequence shrank below two tokens.
    SequenceExhausted,
    /// The best pair occurred fewer times than the minimum frequency.
    BelowMinFrequency,
}

/// Metrics captured for each merge iteration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationMetrics {
    /// Sequential iteration number (1-indexed).
    pub iteration: usize,
    /// Pair merged during the iteration.
    pub pair: Pair,
    /// Id assigned to the merged pair.
    pub token_id: TokenId,
    /// Count of the merged pair before merging.
    pub frequency: usize,
    /// Count of distinct pairs seen during the iteration.
    pub distinct_pairs: usize,
    /// Total number of tokens across all working sequences after the merge.
    pub sequence_len: usize,
    /// Execution time for the iteration.
    pub elapsed_iteration: Duration,
}

/// Aggregate metrics produced by a training session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingMetrics {
    /// Per-iteration snapshots accrued during training.
    pub iterations: Vec<IterationMetrics>,
    /// Number of input bytes the run started from.
    pub initial_len: usize,
    /// Total duration of the training session.
    pub total_duration: Duration,
    /// Reason training terminated.
    pub stop_reason: StopReason,
}

impl TrainingMetrics {
    /// Creates an empty metrics container with pre-allocated capacity.
    #[must_use]
    pub fn new(initial_len: usize, capacity: usize) -> Self {
        Self {
            iterations: Vec::with_capacity(capacity),
            initial_len,
            total_duration: Duration::ZERO,
            stop_reason: StopReason::TargetVocabReached,
        }
    }

    /// Ratio between the input length and the final token count.
    #[must_use]
    pub fn compression_ratio(&self) -> f64 {
        let final_len = self
            .iterations
            .last()
            .map_or(self.initial_len, |last| last.sequence_len);
        if final_len == 0 {
            return 1.0;
        }
        self.initial_len as f64 / final_len as f64
    }
}
