//! Core training loop learning a merge table from byte sequences.

use std::time::Instant;
use std::{fmt, path::Path};

use log::{info, warn};
use rayon::prelude::*;

use crate::config::{IngestConfig, TrainerBuilder, TrainerConfig};
use crate::corpus::load_corpus;
use crate::error::{GptokError, Result};
use crate::metrics::{IterationMetrics, StopReason, TrainingMetrics};
use crate::model::{BpeModel, MergeTable, TokenId, BYTE_ALPHABET};
use crate::pairs::{merge_pair_in_place, PairStats};
use crate::split::{RegexSplitter, SplitPattern};

/// High-level façade configuring and executing BPE training runs.
#[derive(Debug, Clone)]
pub struct Trainer {
    cfg: TrainerConfig,
}

/// Artifacts returned after a training session completes.
#[must_use]
#[derive(Debug, Clone)]
pub struct TrainerArtifacts {
    /// Trained BPE model.
    pub model: BpeModel,
    /// Detailed metrics captured during training.
    pub metrics: TrainingMetrics,
}

impl Trainer {
    /// Creates a new trainer for the supplied configuration.
    #[must_use]
    pub fn new(cfg: TrainerConfig) -> Self {
        Self { cfg }
    }

    /// Returns a [`TrainerBuilder`] with default settings.
    #[must_use]
    pub fn builder() -> TrainerBuilder {
        TrainerConfig::builder()
    }

    /// Returns an immutable reference to the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &TrainerConfig {
        &self.cfg
    }

    /// Trains on a single contiguous byte corpus.
    pub fn train(&self, corpus: &[u8]) -> Result<TrainerArtifacts> {
        self.train_from_sequences(&[corpus.to_vec()])
    }

    /// Splits `text` with `pattern` and trains on the chunks, so no merge crosses a chunk.
    pub fn train_text(&self, text: &str, pattern: &SplitPattern) -> Result<TrainerArtifacts> {
        self.train_texts(&[text], pattern)
    }

    /// [`Trainer::train_text`] over several documents, chunked in order.
    pub fn train_texts<S: AsRef<str>>(
        &self,
        texts: &[S],
        pattern: &SplitPattern,
    ) -> Result<TrainerArtifacts> {
        let splitter = RegexSplitter::new(pattern.clone())?;
        let mut chunks: Vec<Vec<u8>> = Vec::new();
        for text in texts {
            chunks.extend(
                splitter
                    .split(text.as_ref())?
                    .into_iter()
                    .map(|chunk| chunk.as_bytes().to_vec()),
            );
        }
        self.train_from_sequences(&chunks)
    }

    /// Trains a model by loading files from disk according to [`IngestConfig`].
    pub fn train_from_paths<P: AsRef<Path>>(
        &self,
        inputs: &[P],
        ingest: &IngestConfig,
    ) -> Result<TrainerArtifacts> {
        let sequences = load_corpus(inputs, ingest)?;
        self.train_from_sequences(&sequences)
    }

    /// Trains a model from independent in-memory byte sequences.
    ///
    /// Pair counts are summed across sequences in order, so ties still resolve to the pair
    /// seen first; merges never span two sequences.
    pub fn train_from_sequences(&self, sequences: &[Vec<u8>]) -> Result<TrainerArtifacts> {
        self.cfg.validate()?;

        let budget = self.cfg.merge_budget();
        let mut working: Vec<Vec<TokenId>> = sequences
            .iter()
            .map(|seq| seq.iter().map(|&b| TokenId::from(b)).collect())
            .collect();
        let initial_len: usize = working.iter().map(Vec::len).sum();

        let mut merges = MergeTable::new();
        let mut metrics = TrainingMetrics::new(initial_len, budget.min(16_384));
        metrics.stop_reason = if budget < self.cfg.target_vocab_size - BYTE_ALPHABET {
            StopReason::MaxIterationsReached
        } else {
            StopReason::TargetVocabReached
        };
        let training_start = Instant::now();

        for step in 0..budget {
            let iteration_start = Instant::now();
            let mut stats = PairStats::new();
            for sequence in &working {
                stats.extend_from(sequence);
            }

            let Some((pair, frequency)) = stats.most_frequent() else {
                metrics.stop_reason = StopReason::SequenceExhausted;
                warn!("training stopped after {step} merges: no adjacent pairs remain");
                break;
            };
            if frequency < self.cfg.min_frequency {
                metrics.stop_reason = StopReason::BelowMinFrequency;
                warn!(
                    "training stopped after {step} merges: best pair count {frequency} is below {}",
                    self.cfg.min_frequency
                );
                break;
            }

            let new_id = TokenId::try_from(BYTE_ALPHABET + step)
                .map_err(|_| GptokError::Internal("vocabulary size exceeded u32::MAX".into()))?;
            merges.push(pair, new_id)?;

            working
                .par_iter_mut()
                .filter(|sequence| sequence.len() >= 2)
                .for_each(|sequence| {
                    merge_pair_in_place(sequence, pair, new_id);
                });
            let sequence_len: usize = working.iter().map(Vec::len).sum();

            if self.cfg.show_progress {
                info!(
                    "iter {:>6} pair ({:>6}, {:>6}) -> {:>6} freq {:>8} distinct_pairs {:>8} tokens {:>10}",
                    step + 1,
                    pair.0,
                    pair.1,
                    new_id,
                    frequency,
                    stats.len(),
                    sequence_len
                );
            }

            metrics.iterations.push(IterationMetrics {
                iteration: step + 1,
                pair,
                token_id: new_id,
                frequency,
                distinct_pairs: stats.len(),
                sequence_len,
                elapsed_iteration: iteration_start.elapsed(),
            });
        }

        let total_duration = training_start.elapsed();
        metrics.total_duration = total_duration;

        if self.cfg.show_progress {
            info!(
                "completed {} merges in {:.2?}; vocab size {}; compression {:.2}x",
                merges.len(),
                total_duration,
                BYTE_ALPHABET + merges.len(),
                metrics.compression_ratio()
            );
        }

        let model = BpeModel::new(merges);
        Ok(TrainerArtifacts { model, metrics })
    }
}

impl fmt::Display for TrainerArtifacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BPE model with vocab size {}", self.model.vocab_size())?;
        writeln!(f, "Stop reason: {:?}", self.metrics.stop_reason)?;
        writeln!(f, "Compression: {:.2}x", self.metrics.compression_ratio())?;
        writeln!(f, "Total duration: {:?}", self.metrics.total_duration)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trainer(min_frequency: usize, vocab_size: usize) -> Trainer {
        let cfg = TrainerConfig::builder()
            .min_frequency(min_frequency)
            .target_vocab_size(vocab_size)
            .show_progress(false)
            .build()
            .unwrap();
        Trainer::new(cfg)
    }

    #[test]
    fn learns_expected_merges_on_classic_example() {
        let artefacts = trainer(1, 259).train(b"aaabdaaabac").unwrap();
        assert_eq!(
            artefacts.model.merges().entries(),
            &[((97, 97), 256), ((256, 97), 257), ((257, 98), 258)]
        );
        assert_eq!(artefacts.model.vocab().get(258), Some(&b"aaab"[..]));
        assert_eq!(artefacts.metrics.stop_reason, StopReason::TargetVocabReached);
        assert_eq!(artefacts.metrics.iterations.last().unwrap().sequence_len, 5);
    }

    #[test]
    fn training_is_deterministic() {
        let corpus = b"the quick brown fox jumps over the lazy dog; the end".as_slice();
        let first = trainer(1, 280).train(corpus).unwrap();
        let second = trainer(1, 280).train(corpus).unwrap();
        assert_eq!(first.model, second.model);
    }

    #[test]
    fn rejects_vocab_below_byte_alphabet() {
        let cfg = TrainerConfig {
            target_vocab_size: 10,
            ..TrainerConfig::default()
        };
        let err = Trainer::new(cfg).train(b"abc").expect_err("invalid vocab");
        assert!(matches!(err, GptokError::InvalidVocabSize(10)));
    }

    #[test]
    fn stops_when_sequence_collapses() {
        let artefacts = trainer(1, 300).train(b"abcd").unwrap();
        assert_eq!(artefacts.metrics.stop_reason, StopReason::SequenceExhausted);
        assert_eq!(artefacts.model.merges().len(), 3);
        assert_eq!(artefacts.model.vocab().get(258), Some(&b"abcd"[..]));
    }

    #[test]
    fn stops_below_min_frequency() {
        let artefacts = trainer(2, 300).train(b"ababab xyz").unwrap();
        assert_eq!(artefacts.metrics.stop_reason, StopReason::BelowMinFrequency);
        assert!(artefacts
            .metrics
            .iterations
            .iter()
            .all(|iteration| iteration.frequency >= 2));
    }

    #[test]
    fn iteration_cap_limits_merges() {
        let cfg = TrainerConfig::builder()
            .target_vocab_size(300)
            .max_merge_iterations(Some(2))
            .build()
            .unwrap();
        let artefacts = Trainer::new(cfg).train(b"aaabdaaabac").unwrap();
        assert_eq!(artefacts.model.merges().len(), 2);
        assert_eq!(artefacts.metrics.stop_reason, StopReason::MaxIterationsReached);
    }

    #[test]
    fn merges_never_cross_sequences() {
        let sequences = vec![b"xa".to_vec(), b"ay".to_vec(), b"xa".to_vec(), b"ay".to_vec()];
        let artefacts = trainer(1, 270).train_from_sequences(&sequences).unwrap();
        assert_eq!(
            artefacts.model.merges().entries(),
            &[((120, 97), 256), ((97, 121), 257)]
        );
        assert_eq!(artefacts.metrics.stop_reason, StopReason::SequenceExhausted);
    }

    #[test]
    fn train_text_respects_chunk_boundaries() {
        let artefacts = trainer(1, 400)
            .train_text("hello hello hello", &SplitPattern::Gpt2)
            .unwrap();
        for (_, bytes) in artefacts.model.vocab().iter_sorted() {
            // A learned token is a chunk prefix, so a space can only lead it.
            assert!(!bytes[1..].contains(&b' '));
        }
        assert!(artefacts
            .model
            .vocab()
            .iter_sorted()
            .any(|(_, bytes)| bytes == b" hello"));
    }

    #[test]
    fn truncated_model_is_a_prefix() {
        let artefacts = trainer(1, 280).train(b"abababcbcbcdcdcd").unwrap();
        let prefix = artefacts.model.truncated(2);
        assert_eq!(
            prefix.merges().entries(),
            &artefacts.model.merges().entries()[..2]
        );
    }
}
