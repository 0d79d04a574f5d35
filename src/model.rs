//! Merge tables, vocabularies, and the immutable [`BpeModel`] that bundles them.

use rustc_hash::FxHashMap;

use crate::error::{GptokError, Result};
use crate::recovery::ByteRemap;

/// Token identifier used throughout the crate.
pub type TokenId = u32;
/// Merge pair encoded as `(left, right)` token identifiers.
pub type Pair = (TokenId, TokenId);

/// Number of single-byte tokens occupying ids `0..=255`.
pub const BYTE_ALPHABET: usize = 256;

/// Creation-ordered merge table mapping pairs to the id they produce.
///
/// Entries are append-only: ids strictly increase from 256 upwards (gaps are allowed for
/// recovered tables), no pair appears twice, and both halves of a pair are defined before
/// the pair itself. The creation order doubles as the encode-time priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeTable {
    entries: Vec<(Pair, TokenId)>,
    index: FxHashMap<Pair, TokenId>,
}

impl MergeTable {
    /// Creates an empty merge table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `(pair, id)` entries given in creation order.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Pair, TokenId)>,
    {
        let mut table = Self::new();
        for (pair, id) in entries {
            table.push(pair, id)?;
        }
        Ok(table)
    }

    /// Appends a merge, validating the table invariants.
    pub fn push(&mut self, pair: Pair, id: TokenId) -> Result<()> {
        if (id as usize) < BYTE_ALPHABET {
            return Err(GptokError::Internal(format!(
                "merge id {id} falls inside the byte alphabet"
            )));
        }
        if let Some(last) = self.last_id() {
            if id <= last {
                return Err(GptokError::Internal(format!(
                    "merge id {id} is not greater than previous id {last}"
                )));
            }
        }
        if let Some(existing) = self.index.get(&pair) {
            return Err(GptokError::Internal(format!(
                "pair {pair:?} already maps to {existing}"
            )));
        }
        for part in [pair.0, pair.1] {
            if !self.is_defined(part) {
                return Err(GptokError::Internal(format!(
                    "merge {pair:?} -> {id} references undefined token {part}"
                )));
            }
        }
        self.entries.push((pair, id));
        self.index.insert(pair, id);
        Ok(())
    }

    /// Returns the id produced by `pair`, if the pair was learned.
    #[must_use]
    pub fn get(&self, pair: Pair) -> Option<TokenId> {
        self.index.get(&pair).copied()
    }

    /// Returns `true` when `id` is a raw byte or produced by one of the merges.
    #[must_use]
    pub fn is_defined(&self, id: TokenId) -> bool {
        (id as usize) < BYTE_ALPHABET
            || self
                .entries
                .binary_search_by_key(&id, |&(_, merged)| merged)
                .is_ok()
    }

    /// Id of the most recently appended merge.
    #[must_use]
    pub fn last_id(&self) -> Option<TokenId> {
        self.entries.last().map(|&(_, id)| id)
    }

    /// Number of merges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no merge has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merges in creation order.
    #[must_use]
    pub fn entries(&self) -> &[(Pair, TokenId)] {
        &self.entries
    }

    /// Returns a table holding the first `count` merges.
    #[must_use]
    pub fn prefix(&self, count: usize) -> Self {
        let entries = self.entries[..count.min(self.entries.len())].to_vec();
        let index = entries.iter().copied().collect();
        Self { entries, index }
    }
}

/// Mapping from token id to the bytes it renders as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocab {
    tokens: FxHashMap<TokenId, Vec<u8>>,
    max_id: TokenId,
}

impl Vocab {
    /// Materialises the vocabulary by concatenating the renderings of each merge's halves.
    #[must_use]
    pub fn from_merges(merges: &MergeTable) -> Self {
        let mut tokens: FxHashMap<TokenId, Vec<u8>> =
            FxHashMap::with_capacity_and_hasher(BYTE_ALPHABET + merges.len(), Default::default());
        for byte in 0..=u8::MAX {
            tokens.insert(TokenId::from(byte), vec![byte]);
        }
        for &((left, right), id) in merges.entries() {
            let mut bytes = tokens[&left].clone();
            bytes.extend_from_slice(&tokens[&right]);
            tokens.insert(id, bytes);
        }
        let max_id = merges.last_id().unwrap_or(u8::MAX as TokenId);
        Self { tokens, max_id }
    }

    /// Returns the rendering of `id`.
    #[must_use]
    pub fn get(&self, id: TokenId) -> Option<&[u8]> {
        self.tokens.get(&id).map(Vec::as_slice)
    }

    /// Number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Always `false`; the byte alphabet is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Largest id present in the vocabulary.
    #[must_use]
    pub fn max_id(&self) -> TokenId {
        self.max_id
    }

    /// Iterates `(id, bytes)` in ascending id order.
    pub fn iter_sorted(&self) -> impl Iterator<Item = (TokenId, &[u8])> + '_ {
        let mut ids: Vec<TokenId> = self.tokens.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(move |id| (id, self.tokens[&id].as_slice()))
    }
}

/// Trained or recovered BPE model: merge table, vocabulary, and optional byte remap.
///
/// The model is immutable once built and can be shared across threads.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BpeModel {
    merges: MergeTable,
    vocab: Vocab,
    byte_remap: Option<ByteRemap>,
}

impl BpeModel {
    /// Builds a model from a merge table; the vocabulary is derived from the merges.
    pub fn new(merges: MergeTable) -> Self {
        let vocab = Vocab::from_merges(&merges);
        Self {
            merges,
            vocab,
            byte_remap: None,
        }
    }

    /// Builds a model from `(pair, id)` entries given in creation order.
    pub fn from_merges<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Pair, TokenId)>,
    {
        Ok(Self::new(MergeTable::from_entries(entries)?))
    }

    /// Attaches a byte remap; the merge table is then interpreted in the remapped byte space.
    pub fn with_byte_remap(mut self, remap: ByteRemap) -> Self {
        self.byte_remap = Some(remap);
        self
    }

    /// Returns the merge table.
    #[must_use]
    pub fn merges(&self) -> &MergeTable {
        &self.merges
    }

    /// Returns the vocabulary.
    #[must_use]
    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// Returns the byte remap for models recovered from an external rank table.
    #[must_use]
    pub fn byte_remap(&self) -> Option<&ByteRemap> {
        self.byte_remap.as_ref()
    }

    /// Total number of tokens (bytes plus merges), excluding special tokens.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Returns a model holding only the first `num_merges` merges.
    ///
    /// Any prefix of a merge table is a valid model that yields a coarser tokenization.
    pub fn truncated(&self, num_merges: usize) -> Self {
        let merges = self.merges.prefix(num_merges);
        let vocab = Vocab::from_merges(&merges);
        Self {
            merges,
            vocab,
            byte_remap: self.byte_remap.clone(),
        }
    }

    /// Creates a derived model trimmed to the requested vocabulary size while preserving merge order.
    pub fn derive_with_vocab(&self, target_vocab_size: usize) -> Result<Self> {
        if target_vocab_size < BYTE_ALPHABET {
            return Err(GptokError::InvalidVocabSize(target_vocab_size));
        }
        let current = self.vocab_size();
        if target_vocab_size > current {
            return Err(GptokError::InvalidConfig(format!(
                "requested vocab {target_vocab_size} exceeds model size {current}"
            )));
        }
        Ok(self.truncated(target_vocab_size - BYTE_ALPHABET))
    }
}
