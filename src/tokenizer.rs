//! Text encoding and decoding on top of a [`BpeModel`].
//!
//! Encoding carves special tokens out of the input, splits the remaining spans with the
//! configured [`RegexSplitter`], and encodes each chunk independently by replaying merges in
//! the order they were learned. Decoding concatenates token renderings and converts them to
//! text lossily.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::config::TokenizerConfig;
use crate::error::{GptokError, Result};
use crate::model::{BpeModel, TokenId};
use crate::pairs::merge_pair_in_place;
use crate::ranks::RankProvider;
use crate::recovery::{rank_limited_parts, ByteRemap};
use crate::special_tokens::{AllowedSpecial, Segment, SpecialTokens};
use crate::split::RegexSplitter;

/// Immutable tokenizer; safe to share across threads.
pub struct Tokenizer {
    model: BpeModel,
    config: TokenizerConfig,
    splitter: RegexSplitter,
    special: SpecialTokens,
    remap: Option<ByteRemap>,
    provider: Option<Arc<dyn RankProvider>>,
    token_index: FxHashMap<Vec<u8>, TokenId>,
}

impl Tokenizer {
    /// Builds a tokenizer encoding with the model's own merge table.
    pub fn new(model: BpeModel, config: TokenizerConfig) -> Result<Self> {
        let remap = if config.compatibility_mode {
            let remap = model.byte_remap().cloned().ok_or_else(|| {
                GptokError::InvalidConfig(
                    "compatibility mode requires a model recovered from an external vocabulary"
                        .into(),
                )
            })?;
            Some(remap)
        } else {
            if model.byte_remap().is_some_and(|remap| !remap.is_identity()) {
                warn!("model carries a byte remap but compatibility mode is disabled");
            }
            None
        };
        let splitter = RegexSplitter::new(config.split_pattern.clone())?;
        let special = SpecialTokens::new(config.special_tokens.clone(), model.vocab().max_id())?;

        let mut token_index = FxHashMap::default();
        for (id, bytes) in model.vocab().iter_sorted() {
            let raw = match &remap {
                Some(remap) => remap.restore(bytes),
                None => bytes.to_vec(),
            };
            token_index.entry(raw).or_insert(id);
        }
        for (literal, &id) in special.as_map() {
            token_index.insert(literal.as_bytes().to_vec(), id);
        }

        debug!(
            "tokenizer ready: {} tokens, {} special, pattern {}, compatibility {}",
            model.vocab_size(),
            special.len(),
            splitter.pattern(),
            remap.is_some()
        );

        Ok(Self {
            model,
            config,
            splitter,
            special,
            remap,
            provider: None,
            token_index,
        })
    }

    /// Builds a tokenizer whose chunk encoding is delegated to an external rank provider.
    ///
    /// Chunks are encoded by greedy lowest-rank merging through
    /// [`RankProvider::encode_primitive`]; `model` is still used for decoding and lookups.
    pub fn with_provider(
        model: BpeModel,
        config: TokenizerConfig,
        provider: Arc<dyn RankProvider>,
    ) -> Result<Self> {
        let mut tokenizer = Self::new(model, config)?;
        tokenizer.provider = Some(provider);
        Ok(tokenizer)
    }

    /// Returns the underlying model.
    pub fn model(&self) -> &BpeModel {
        &self.model
    }

    /// Returns the configuration the tokenizer was built from.
    #[must_use]
    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    /// Returns the special-token table.
    #[must_use]
    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.special
    }

    /// Number of ordinary tokens plus special tokens.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.model.vocab_size() + self.special.len()
    }

    /// Encodes `text`, honouring the special-token policy.
    pub fn encode(&self, text: &str, allowed: &AllowedSpecial) -> Result<Vec<TokenId>> {
        let mut ids = Vec::with_capacity(text.len() / 3 + 1);
        for segment in self.special.segment(text, allowed)? {
            match segment {
                Segment::Special(id) => ids.push(id),
                Segment::Text(span) => self.encode_span(span, &mut ids)?,
            }
        }
        Ok(ids)
    }

    /// Encodes `text` treating special-token literals as ordinary text.
    pub fn encode_ordinary(&self, text: &str) -> Result<Vec<TokenId>> {
        let mut ids = Vec::with_capacity(text.len() / 3 + 1);
        self.encode_span(text, &mut ids)?;
        Ok(ids)
    }

    /// Encodes several texts in parallel; results keep the input order.
    pub fn encode_batch<S>(&self, texts: &[S], allowed: &AllowedSpecial) -> Result<Vec<Vec<TokenId>>>
    where
        S: AsRef<str> + Sync,
    {
        texts
            .par_iter()
            .map(|text| self.encode(text.as_ref(), allowed))
            .collect()
    }

    fn encode_span(&self, span: &str, out: &mut Vec<TokenId>) -> Result<()> {
        for chunk in self.splitter.split(span)? {
            match &self.provider {
                Some(provider) => out.extend(encode_with_provider(provider.as_ref(), chunk.as_bytes())?),
                None => out.extend(self.encode_chunk(chunk.as_bytes())),
            }
        }
        Ok(())
    }

    /// Replays merges on one chunk, always applying the earliest-learned pair present.
    fn encode_chunk(&self, chunk: &[u8]) -> Vec<TokenId> {
        let mut ids: Vec<TokenId> = match &self.remap {
            Some(remap) => chunk.iter().map(|&b| TokenId::from(remap.forward(b))).collect(),
            None => chunk.iter().map(|&b| TokenId::from(b)).collect(),
        };
        let merges = self.model.merges();
        while ids.len() >= 2 {
            let best = ids
                .windows(2)
                .filter_map(|w| merges.get((w[0], w[1])).map(|id| ((w[0], w[1]), id)))
                .min_by_key(|&(_, id)| id);
            let Some((pair, id)) = best else {
                break;
            };
            merge_pair_in_place(&mut ids, pair, id);
        }
        ids
    }

    /// Decodes ids to text, replacing invalid UTF-8 with `U+FFFD`.
    pub fn decode(&self, ids: &[TokenId]) -> Result<String> {
        let bytes = self.decode_bytes(ids)?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        })
    }

    /// Decodes ids to the raw bytes they render as.
    pub fn decode_bytes(&self, ids: &[TokenId]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(ids.len() * 4);
        for &id in ids {
            self.append_token(id, &mut out)?;
        }
        Ok(out)
    }

    fn append_token(&self, id: TokenId, out: &mut Vec<u8>) -> Result<()> {
        if let Some(literal) = self.special.literal(id) {
            out.extend_from_slice(literal.as_bytes());
            return Ok(());
        }
        let bytes = self
            .model
            .vocab()
            .get(id)
            .ok_or(GptokError::UnknownTokenId(id))?;
        match &self.remap {
            Some(remap) => out.extend(bytes.iter().map(|&b| remap.inverse(b))),
            None => out.extend_from_slice(bytes),
        }
        Ok(())
    }

    /// Id of the token rendering exactly as `bytes`, special tokens included.
    #[must_use]
    pub fn token_to_id(&self, bytes: &[u8]) -> Option<TokenId> {
        self.token_index.get(bytes).copied()
    }

    /// Raw bytes rendered by `id`.
    pub fn id_to_token(&self, id: TokenId) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.append_token(id, &mut out)?;
        Ok(out)
    }
}

fn encode_with_provider(provider: &dyn RankProvider, chunk: &[u8]) -> Result<Vec<TokenId>> {
    rank_limited_parts(provider, chunk, None)
        .into_iter()
        .map(|part| {
            provider.encode_primitive(part).ok_or_else(|| {
                GptokError::Internal(format!("provider has no rank for {} byte piece", part.len()))
            })
        })
        .collect()
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.model.vocab_size())
            .field("special_tokens", self.special.as_map())
            .field("split_pattern", self.splitter.pattern())
            .field("compatibility_mode", &self.remap.is_some())
            .field("provider", &self.provider.is_some())
            .finish_non_exhaustive()
    }
}
