//! Byte-level byte pair encoding (BPE) tokenizer library and CLI.
//!
//! The crate trains GPT-style byte-level BPE models, encodes and decodes text with them,
//! and rebuilds explicit merge tables from tiktoken-style rank files so that existing
//! vocabularies such as `cl100k_base` can be reproduced exactly. Typical usage trains a
//! [`BpeModel`], wraps it in a [`Tokenizer`], and encodes text:
//!
//! ```no_run
//! use gptok::{AllowedSpecial, SplitPattern, Tokenizer, TokenizerConfig, Trainer, TrainerConfig};
//!
//! # fn main() -> gptok::Result<()> {
//! let trainer_cfg = TrainerConfig::builder()
//!     .target_vocab_size(512)
//!     .show_progress(false)
//!     .build()?;
//! let artifacts = Trainer::new(trainer_cfg).train_text("hello hello world", &SplitPattern::Gpt4)?;
//! let tokenizer_cfg = TokenizerConfig::builder()
//!     .special_token("<|endoftext|>", 100_000)
//!     .build()?;
//! let tokenizer = Tokenizer::new(artifacts.model, tokenizer_cfg)?;
//! let ids = tokenizer.encode("hello<|endoftext|>", &AllowedSpecial::All)?;
//! assert_eq!(tokenizer.decode(&ids)?, "hello<|endoftext|>");
//! # Ok(())
//! # }
//! ```
//!
//! External vocabularies are loaded with [`RankTable::from_tiktoken_file`] and turned into
//! a model with [`build_from_external_vocab`]; build the tokenizer with
//! `compatibility_mode` enabled so the recovered byte remap is applied.
//!
//! The CLI is enabled by default through the `cli` feature. Users targeting the
//! library portion only can disable default features to avoid the CLI
//! dependencies: `gptok = { version = "...", default-features = false }`.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    unused_lifetimes,
    unreachable_pub
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod corpus;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pairs;
pub mod ranks;
pub mod recovery;
pub mod serialization;
pub mod special_tokens;
pub mod split;
pub mod tokenizer;
pub mod trainer;

pub use config::{IngestConfig, TokenizerBuilder, TokenizerConfig, TrainerBuilder, TrainerConfig};
pub use error::{GptokError, Result};
pub use metrics::{IterationMetrics, StopReason, TrainingMetrics};
pub use model::{BpeModel, MergeTable, Pair, TokenId, Vocab};
pub use pairs::{merge_pair, pair_stats, PairStats};
pub use ranks::{RankProvider, RankTable};
pub use recovery::{build_from_external_vocab, recover_merges, ByteRemap};
pub use special_tokens::{AllowedSpecial, SpecialTokens};
pub use split::{RegexSplitter, SplitPattern};
pub use tokenizer::Tokenizer;
pub use trainer::{Trainer, TrainerArtifacts};
