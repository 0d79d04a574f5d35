//! External rank tables and the provider interface consumed in compatibility mode.
//!
//! A rank table is a flat mapping from byte string to rank, as shipped by tiktoken-style
//! vocabularies. Lower ranks merge first. The format on disk is one entry per line:
//!
//! ```text
//! SGVsbG8= 0
//! V29ybGQ= 1
//! ```
//!
//! where the first column is the base64-encoded token bytes.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::FxHashMap;

use crate::error::{GptokError, Result};
use crate::model::{BpeModel, TokenId};

/// Single-token lookups offered by an external tokenization engine.
///
/// Implementors only expose the primitive `bytes <-> rank` mapping; the crate drives the
/// merging itself.
pub trait RankProvider: Send + Sync {
    /// Returns the rank of `piece` when it is a single token of the provider's vocabulary.
    fn encode_primitive(&self, piece: &[u8]) -> Option<TokenId>;

    /// Returns the bytes of the token with the given rank.
    fn decode_primitive(&self, rank: TokenId) -> Option<&[u8]>;
}

/// In-memory `byte string -> rank` table with its inverse.
#[derive(Debug, Clone, Default)]
pub struct RankTable {
    encoder: FxHashMap<Vec<u8>, TokenId>,
    decoder: FxHashMap<TokenId, Vec<u8>>,
}

impl RankTable {
    /// Builds a table from `(bytes, rank)` entries. Later duplicates of a byte string win.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Vec<u8>, TokenId)>,
    {
        let mut table = Self::default();
        for (bytes, rank) in entries {
            table.insert(bytes, rank);
        }
        table
    }

    /// Parses a tiktoken-format rank file from raw bytes.
    pub fn from_tiktoken(data: &[u8]) -> Result<Self> {
        let mut table = Self::default();
        for (line_no, line) in data.split(|&b| b == b'\n').enumerate() {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            let space = line.iter().rposition(|&b| b == b' ').ok_or_else(|| {
                GptokError::Serialization(format!("line {}: missing space separator", line_no + 1))
            })?;
            let token = STANDARD.decode(&line[..space])?;
            let rank = std::str::from_utf8(&line[space + 1..])
                .ok()
                .and_then(|text| text.trim().parse::<TokenId>().ok())
                .ok_or_else(|| {
                    GptokError::Serialization(format!("line {}: invalid rank", line_no + 1))
                })?;
            table.insert(token, rank);
        }
        Ok(table)
    }

    /// Reads and parses a tiktoken-format rank file.
    pub fn from_tiktoken_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|err| GptokError::io(err, Some(path.to_path_buf())))?;
        Self::from_tiktoken(&data)
    }

    /// Exports a model's vocabulary as a rank table, treating token ids as ranks.
    ///
    /// Byte-remapped models are exported in raw-byte space.
    pub fn from_model(model: &BpeModel) -> Self {
        let remap = model.byte_remap();
        Self::from_entries(model.vocab().iter_sorted().map(|(id, bytes)| {
            let bytes = match remap {
                Some(remap) => remap.restore(bytes),
                None => bytes.to_vec(),
            };
            (bytes, id)
        }))
    }

    /// Serialises the table in tiktoken format, ordered by rank.
    #[must_use]
    pub fn to_tiktoken(&self) -> String {
        let mut entries: Vec<(&Vec<u8>, TokenId)> =
            self.encoder.iter().map(|(bytes, &rank)| (bytes, rank)).collect();
        entries.sort_unstable_by_key(|&(_, rank)| rank);
        let mut out = String::new();
        for (bytes, rank) in entries {
            out.push_str(&STANDARD.encode(bytes));
            out.push(' ');
            out.push_str(&rank.to_string());
            out.push('\n');
        }
        out
    }

    /// Inserts an entry.
    pub fn insert(&mut self, bytes: Vec<u8>, rank: TokenId) {
        if let Some(previous) = self.encoder.insert(bytes.clone(), rank) {
            if previous != rank {
                self.decoder.remove(&previous);
            }
        }
        self.decoder.insert(rank, bytes);
    }

    /// Rank of `bytes`, if present.
    #[must_use]
    pub fn rank(&self, bytes: &[u8]) -> Option<TokenId> {
        self.encoder.get(bytes).copied()
    }

    /// Number of distinct byte strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.encoder.len()
    }

    /// Returns `true` when the table holds no entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.encoder.is_empty()
    }

    /// Iterates `(bytes, rank)` in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], TokenId)> + '_ {
        self.encoder
            .iter()
            .map(|(bytes, &rank)| (bytes.as_slice(), rank))
    }

    /// Returns `true` when two byte strings share a rank.
    #[must_use]
    pub fn has_duplicate_ranks(&self) -> bool {
        self.decoder.len() != self.encoder.len()
    }
}

impl RankProvider for RankTable {
    fn encode_primitive(&self, piece: &[u8]) -> Option<TokenId> {
        self.rank(piece)
    }

    fn decode_primitive(&self, rank: TokenId) -> Option<&[u8]> {
        self.decoder.get(&rank).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tiktoken_lines() {
        // "Hello" = SGVsbG8=, "World" = V29ybGQ=
        let table = RankTable::from_tiktoken(b"SGVsbG8= 0\r\nV29ybGQ= 1\n\n").unwrap();
        assert_eq!(table.rank(b"Hello"), Some(0));
        assert_eq!(table.rank(b"World"), Some(1));
        assert_eq!(table.decode_primitive(1), Some(&b"World"[..]));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn rejects_lines_without_rank() {
        let err = RankTable::from_tiktoken(b"SGVsbG8=\n").expect_err("missing separator");
        assert!(matches!(err, GptokError::Serialization(_)));
        let err = RankTable::from_tiktoken(b"SGVsbG8= x\n").expect_err("bad rank");
        assert!(matches!(err, GptokError::Serialization(message) if message.contains("line 1")));
    }

    #[test]
    fn tiktoken_export_parses_back() {
        let table = RankTable::from_entries([(b"ab".to_vec(), 7), (vec![0xFF], 3)]);
        let text = table.to_tiktoken();
        assert_eq!(text, "/w== 3\nYWI= 7\n");
        let parsed = RankTable::from_tiktoken(text.as_bytes()).unwrap();
        assert_eq!(parsed.rank(b"ab"), Some(7));
        assert_eq!(parsed.rank(&[0xFF]), Some(3));
    }

    #[test]
    fn detects_duplicate_ranks() {
        let table = RankTable::from_entries([(b"a".to_vec(), 1), (b"b".to_vec(), 1)]);
        assert!(table.has_duplicate_ranks());
    }
}
