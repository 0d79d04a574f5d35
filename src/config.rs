//! Configuration builders controlling training, tokenizer construction, and corpus ingestion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GptokError, Result};
use crate::model::{TokenId, BYTE_ALPHABET};
use crate::split::SplitPattern;

/// Configuration for BPE training.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrainerConfig {
    /// Target vocabulary size including the 256 base byte tokens.
    pub target_vocab_size: usize,
    /// Minimum pair count required to learn a merge; `1` never stops early.
    pub min_frequency: usize,
    /// Hard cap on merge iterations; `None` uses the target vocabulary size.
    pub max_merge_iterations: Option<usize>,
    /// Enables per-iteration logging through the `log` facade.
    pub show_progress: bool,
}

impl TrainerConfig {
    /// Returns a builder initialised with [`TrainerConfig::default`].
    #[must_use]
    pub fn builder() -> TrainerBuilder {
        TrainerBuilder::default()
    }

    /// Validates the invariants required for training.
    pub fn validate(&self) -> Result<()> {
        if self.target_vocab_size < BYTE_ALPHABET {
            return Err(GptokError::InvalidVocabSize(self.target_vocab_size));
        }
        let max_vocab = usize::try_from(TokenId::MAX).unwrap_or(usize::MAX);
        if self.target_vocab_size > max_vocab {
            return Err(GptokError::InvalidConfig(format!(
                "target_vocab_size ({}) exceeds {max_vocab}, the maximum representable TokenId",
                self.target_vocab_size
            )));
        }
        if self.min_frequency == 0 {
            return Err(GptokError::InvalidConfig(
                "min_frequency must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Number of merges the run will attempt.
    #[must_use]
    pub fn merge_budget(&self) -> usize {
        let budget = self.target_vocab_size.saturating_sub(BYTE_ALPHABET);
        match self.max_merge_iterations {
            Some(limit) => budget.min(limit),
            None => budget,
        }
    }
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            target_vocab_size: 512,
            min_frequency: 1,
            max_merge_iterations: None,
            show_progress: false,
        }
    }
}

/// Builder for [`TrainerConfig`].
#[derive(Debug, Default, Clone)]
pub struct TrainerBuilder {
    cfg: TrainerConfig,
}

impl TrainerBuilder {
    /// Creates a builder with [`TrainerConfig::default`] settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the desired vocabulary size (including base byte tokens).
    #[must_use]
    pub fn target_vocab_size(mut self, value: usize) -> Self {
        self.cfg.target_vocab_size = value;
        self
    }

    /// Sets the minimum merge frequency.
    #[must_use]
    pub fn min_frequency(mut self, value: usize) -> Self {
        self.cfg.min_frequency = value;
        self
    }

    /// Sets a hard merge iteration limit.
    #[must_use]
    pub fn max_merge_iterations(mut self, value: Option<usize>) -> Self {
        self.cfg.max_merge_iterations = value;
        self
    }

    /// Enables or disables per-iteration logging.
    #[must_use]
    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.cfg.show_progress = enabled;
        self
    }

    /// Finalises the builder, returning a validated [`TrainerConfig`].
    pub fn build(self) -> Result<TrainerConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

/// Construction-time settings of a [`crate::Tokenizer`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenizerConfig {
    /// Pre-tokenization pattern.
    pub split_pattern: SplitPattern,
    /// Reserved literals and their ids; ids must lie above the model's vocabulary.
    pub special_tokens: BTreeMap<String, TokenId>,
    /// Applies the model's byte remap around encoding and decoding.
    pub compatibility_mode: bool,
}

impl TokenizerConfig {
    /// Returns a builder initialised with [`TokenizerConfig::default`].
    #[must_use]
    pub fn builder() -> TokenizerBuilder {
        TokenizerBuilder::default()
    }
}

/// Builder for [`TokenizerConfig`].
#[derive(Debug, Default, Clone)]
pub struct TokenizerBuilder {
    cfg: TokenizerConfig,
}

impl TokenizerBuilder {
    /// Selects the split pattern.
    #[must_use]
    pub fn split_pattern(mut self, pattern: SplitPattern) -> Self {
        self.cfg.split_pattern = pattern;
        self
    }

    /// Adds one special token.
    #[must_use]
    pub fn special_token(mut self, literal: impl Into<String>, id: TokenId) -> Self {
        self.cfg.special_tokens.insert(literal.into(), id);
        self
    }

    /// Replaces the special-token table.
    #[must_use]
    pub fn special_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = (S, TokenId)>,
        S: Into<String>,
    {
        self.cfg.special_tokens = tokens
            .into_iter()
            .map(|(literal, id)| (literal.into(), id))
            .collect();
        self
    }

    /// Enables or disables byte-remap compatibility mode.
    #[must_use]
    pub fn compatibility_mode(mut self, enabled: bool) -> Self {
        self.cfg.compatibility_mode = enabled;
        self
    }

    /// Finalises the builder.
    pub fn build(self) -> Result<TokenizerConfig> {
        if let SplitPattern::Custom(pattern) = &self.cfg.split_pattern {
            if pattern.is_empty() {
                return Err(GptokError::InvalidConfig(
                    "custom split pattern must not be empty".into(),
                ));
            }
        }
        Ok(self.cfg)
    }
}

/// Configuration controlling how training corpora are read from disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestConfig {
    /// Enables recursive directory traversal.
    pub recursive: bool,
    /// Follows symlinks encountered during traversal.
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            follow_symlinks: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_vocab_below_byte_alphabet() {
        let err = TrainerConfig::builder()
            .target_vocab_size(255)
            .build()
            .expect_err("validation should fail");
        assert!(matches!(err, GptokError::InvalidVocabSize(255)));
    }

    #[test]
    fn validate_rejects_zero_min_frequency() {
        let cfg = TrainerConfig {
            min_frequency: 0,
            ..TrainerConfig::default()
        };
        let err = cfg.validate().expect_err("validation should fail");
        assert!(matches!(
            err,
            GptokError::InvalidConfig(message) if message.contains("min_frequency")
        ));
    }

    #[test]
    fn merge_budget_honours_iteration_cap() {
        let cfg = TrainerConfig::builder()
            .target_vocab_size(300)
            .max_merge_iterations(Some(10))
            .build()
            .unwrap();
        assert_eq!(cfg.merge_budget(), 10);
        let uncapped = TrainerConfig::builder().target_vocab_size(300).build().unwrap();
        assert_eq!(uncapped.merge_budget(), 44);
    }

    #[test]
    fn tokenizer_builder_collects_special_tokens() {
        let cfg = TokenizerConfig::builder()
            .split_pattern(SplitPattern::Gpt2)
            .special_token("<|endoftext|>", 1000)
            .special_token("<|pad|>", 1001)
            .compatibility_mode(true)
            .build()
            .unwrap();
        assert_eq!(cfg.special_tokens.len(), 2);
        assert_eq!(cfg.special_tokens["<|pad|>"], 1001);
        assert!(cfg.compatibility_mode);
    }

    #[test]
    fn tokenizer_builder_rejects_empty_custom_pattern() {
        let result = TokenizerConfig::builder()
            .split_pattern(SplitPattern::Custom(String::new()))
            .build();
        assert!(result.is_err());
    }
}
