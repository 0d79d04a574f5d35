//! Pre-tokenization: splitting text into chunks that merges never cross.

use std::fmt;
use std::str::FromStr;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GptokError, Result};

/// GPT-2 style pattern: letters, digits, punctuation runs and whitespace, each optionally led
/// by a single space, plus common English contractions.
pub const GPT2_SPLIT_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// GPT-4 (`cl100k_base`) style pattern: case-insensitive contractions, digit runs capped at
/// three, and newline-aware whitespace handling.
pub const GPT4_SPLIT_PATTERN: &str = r"'(?i:[sdmt]|ll|ve|re)|[^\r\n\p{L}\p{N}]?+\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]++[\r\n]*|\s*[\r\n]|\s+(?!\S)|\s+";

/// Choice of pre-tokenization pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SplitPattern {
    /// [`GPT2_SPLIT_PATTERN`]; digit runs are unbounded.
    Gpt2,
    /// [`GPT4_SPLIT_PATTERN`]; digit runs are capped at three.
    #[default]
    Gpt4,
    /// Caller-supplied pattern.
    Custom(String),
}

impl SplitPattern {
    /// Returns the regular expression source.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Gpt2 => GPT2_SPLIT_PATTERN,
            Self::Gpt4 => GPT4_SPLIT_PATTERN,
            Self::Custom(pattern) => pattern,
        }
    }
}

impl FromStr for SplitPattern {
    type Err = GptokError;

    /// Parses `gpt2`/`simple`, `gpt4`/`strict`, or treats anything else as a custom regex.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gpt2" | "simple" => Ok(Self::Gpt2),
            "gpt4" | "strict" => Ok(Self::Gpt4),
            "" => Err(GptokError::InvalidConfig("split pattern must not be empty".into())),
            other => Ok(Self::Custom(other.to_string())),
        }
    }
}

impl fmt::Display for SplitPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpt2 => f.write_str("gpt2"),
            Self::Gpt4 => f.write_str("gpt4"),
            Self::Custom(pattern) => write!(f, "custom({pattern})"),
        }
    }
}

/// Compiled pre-tokenizer.
#[derive(Debug, Clone)]
pub struct RegexSplitter {
    pattern: SplitPattern,
    regex: Regex,
}

impl RegexSplitter {
    /// Compiles the pattern.
    pub fn new(pattern: SplitPattern) -> Result<Self> {
        let regex = Regex::new(pattern.as_str())?;
        Ok(Self { pattern, regex })
    }

    /// The pattern this splitter was compiled from.
    #[must_use]
    pub fn pattern(&self) -> &SplitPattern {
        &self.pattern
    }

    /// Splits `text` into chunks in order.
    ///
    /// Text not covered by any match is kept as its own chunk, so the chunks always
    /// concatenate back to `text`.
    pub fn split<'t>(&self, text: &'t str) -> Result<Vec<&'t str>> {
        let mut chunks = Vec::new();
        let mut last_end = 0usize;
        for found in self.regex.find_iter(text) {
            let m = found.map_err(|err| GptokError::RegexMatch(err.to_string()))?;
            if m.start() > last_end {
                chunks.push(&text[last_end..m.start()]);
            }
            if !m.as_str().is_empty() {
                chunks.push(m.as_str());
            }
            last_end = m.end();
        }
        if last_end < text.len() {
            chunks.push(&text[last_end..]);
        }
        Ok(chunks)
    }
}
