//! Error handling utilities shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::TokenId;

/// Convenient result type used throughout the crate.
pub type Result<T, E = GptokError> = std::result::Result<T, E>;

/// Domain-specific error describing failures during training, recovery, encoding, or decoding.
#[derive(Debug, Error)]
pub enum GptokError {
    /// Training was requested with a vocabulary smaller than the byte alphabet.
    #[error("target vocabulary size {0} is smaller than the 256-entry byte alphabet")]
    InvalidVocabSize(usize),
    /// The `allowed_special` policy could not be interpreted.
    #[error("allowed_special policy not understood: {0}")]
    InvalidSpecialTokenPolicy(String),
    /// A token id has neither a vocabulary rendering nor a special-token literal.
    #[error("unknown token id {0}")]
    UnknownTokenId(TokenId),
    /// Merge recovery could not split an external vocabulary entry into exactly two parts.
    #[error("malformed external vocabulary at rank {rank}: {reason}")]
    MalformedExternalVocabulary {
        /// Rank of the offending entry.
        rank: TokenId,
        /// Human readable description of the inconsistency.
        reason: String,
    },
    /// A special token id overlaps the learned vocabulary or another special token.
    #[error("special token {token:?} with id {id} collides with {existing}")]
    SpecialTokenCollision {
        /// Literal of the rejected special token.
        token: String,
        /// Id requested for the literal.
        id: TokenId,
        /// Description of what the id collides with.
        existing: String,
    },
    /// Text contained a special-token literal while the policy forbids it.
    #[error("text contains disallowed special token {0:?}")]
    DisallowedSpecialToken(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The split pattern failed to compile.
    #[error("invalid split pattern: {0}")]
    Pattern(#[from] Box<fancy_regex::Error>),
    /// The regex engine failed while splitting text (e.g. backtrack limit exceeded).
    #[error("regex match failed: {0}")]
    RegexMatch(String),
    /// Filesystem IO error with optional context path.
    #[error("io error while processing {path:?}: {source}")]
    Io {
        /// Underlying IO error returned by the standard library.
        source: std::io::Error,
        /// Target path associated with the IO failure if available.
        path: Option<PathBuf>,
    },
    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Catch-all variant for invariants that should not occur.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<fancy_regex::Error> for GptokError {
    fn from(err: fancy_regex::Error) -> Self {
        Self::Pattern(Box::new(err))
    }
}

impl From<serde_json::Error> for GptokError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<base64::DecodeError> for GptokError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Serialization(format!("invalid base64 token: {err}"))
    }
}

impl From<aho_corasick::BuildError> for GptokError {
    fn from(err: aho_corasick::BuildError) -> Self {
        Self::Internal(format!("special token matcher: {err}"))
    }
}

impl GptokError {
    /// Helper constructor that attaches an optional path when wrapping IO errors.
    pub fn io(source: std::io::Error, path: Option<PathBuf>) -> Self {
        Self::Io { source, path }
    }

    pub(crate) fn malformed(rank: TokenId, reason: impl Into<String>) -> Self {
        Self::MalformedExternalVocabulary {
            rank,
            reason: reason.into(),
        }
    }
}
