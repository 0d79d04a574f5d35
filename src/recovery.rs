//! Reconstruction of an explicit merge table from a rank-ordered external vocabulary.
//!
//! Rank tables list tokens and their priority but not which pair produced each token. The
//! pair is recovered by replaying greedy BPE over the token's own bytes while only allowing
//! entries of strictly lower rank; the two surviving parts are the pair that created it.
//! Single-byte entries are handled separately by [`ByteRemap`], because providers are free
//! to assign the 256 raw bytes any ranks in `0..256`.

use log::debug;
use rayon::prelude::*;

use crate::error::{GptokError, Result};
use crate::model::{BpeModel, MergeTable, Pair, TokenId, BYTE_ALPHABET};
use crate::ranks::{RankProvider, RankTable};

/// Permutation between raw byte values and a provider's single-byte ranks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRemap {
    forward: [u8; BYTE_ALPHABET],
    inverse: [u8; BYTE_ALPHABET],
}

impl ByteRemap {
    /// Identity permutation.
    #[must_use]
    pub fn identity() -> Self {
        let mut forward = [0u8; BYTE_ALPHABET];
        for (slot, byte) in forward.iter_mut().zip(0..=u8::MAX) {
            *slot = byte;
        }
        Self {
            forward,
            inverse: forward,
        }
    }

    /// Builds the permutation from a `raw byte -> rank` array, checking it is a bijection.
    pub fn from_forward(forward: [u8; BYTE_ALPHABET]) -> Result<Self> {
        let mut inverse = [0u8; BYTE_ALPHABET];
        let mut seen = [false; BYTE_ALPHABET];
        for (byte, &rank) in (0..=u8::MAX).zip(forward.iter()) {
            if seen[rank as usize] {
                return Err(GptokError::malformed(
                    TokenId::from(rank),
                    "rank assigned to more than one single byte",
                ));
            }
            seen[rank as usize] = true;
            inverse[rank as usize] = byte;
        }
        Ok(Self { forward, inverse })
    }

    /// Reads the rank of every single byte from an external table.
    pub fn from_ranks(ranks: &RankTable) -> Result<Self> {
        let mut forward = [0u8; BYTE_ALPHABET];
        for (slot, byte) in forward.iter_mut().zip(0..=u8::MAX) {
            let rank = ranks.rank(&[byte]).ok_or_else(|| {
                GptokError::malformed(
                    TokenId::MAX,
                    format!("single byte 0x{byte:02x} has no rank"),
                )
            })?;
            *slot = u8::try_from(rank).map_err(|_| {
                GptokError::malformed(
                    rank,
                    format!("single byte 0x{byte:02x} ranked outside 0..256"),
                )
            })?;
        }
        Self::from_forward(forward)
    }

    /// Maps a raw byte to its rank-space byte.
    #[inline]
    #[must_use]
    pub fn forward(&self, byte: u8) -> u8 {
        self.forward[byte as usize]
    }

    /// Maps a rank-space byte back to the raw byte.
    #[inline]
    #[must_use]
    pub fn inverse(&self, byte: u8) -> u8 {
        self.inverse[byte as usize]
    }

    /// Converts raw bytes into rank space.
    #[must_use]
    pub fn apply(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.iter().map(|&b| self.forward(b)).collect()
    }

    /// Converts rank-space bytes back into raw bytes.
    #[must_use]
    pub fn restore(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.iter().map(|&b| self.inverse(b)).collect()
    }

    /// Returns `true` when the permutation is the identity.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.forward.iter().zip(0..=u8::MAX).all(|(&f, b)| f == b)
    }

    /// The `raw byte -> rank` array.
    #[must_use]
    pub fn forward_table(&self) -> &[u8; BYTE_ALPHABET] {
        &self.forward
    }
}

/// Splits `token` with greedy lowest-rank merging restricted to ranks below `max_rank`.
///
/// Parts are tracked as boundary offsets into `token`; each step joins the adjacent pair of
/// parts whose concatenation has the lowest qualifying rank (leftmost on ties).
pub fn rank_limited_parts<'a, R: RankProvider + ?Sized>(
    ranks: &R,
    token: &'a [u8],
    max_rank: Option<TokenId>,
) -> Vec<&'a [u8]> {
    // bounds[i]..bounds[i + 1] is part i.
    let mut bounds: Vec<usize> = (0..=token.len()).collect();
    while bounds.len() > 2 {
        let mut best: Option<(usize, TokenId)> = None;
        for i in 0..bounds.len() - 2 {
            let Some(rank) = ranks.encode_primitive(&token[bounds[i]..bounds[i + 2]]) else {
                continue;
            };
            if max_rank.is_some_and(|limit| rank >= limit) {
                continue;
            }
            if best.map_or(true, |(_, best_rank)| rank < best_rank) {
                best = Some((i, rank));
            }
        }
        let Some((i, _)) = best else {
            break;
        };
        bounds.remove(i + 1);
    }
    bounds
        .windows(2)
        .map(|window| &token[window[0]..window[1]])
        .collect()
}

fn recover_pair(ranks: &RankTable, token: &[u8], rank: TokenId) -> Result<Pair> {
    let parts = rank_limited_parts(ranks, token, Some(rank));
    if parts.len() != 2 {
        return Err(GptokError::malformed(
            rank,
            format!(
                "{} byte token converged to {} parts instead of 2",
                token.len(),
                parts.len()
            ),
        ));
    }
    let lookup = |part: &[u8]| {
        ranks
            .rank(part)
            .ok_or_else(|| GptokError::malformed(rank, "merge part has no rank"))
    };
    Ok((lookup(parts[0])?, lookup(parts[1])?))
}

/// Reconstructs the merge table implied by a rank table.
///
/// Entries are independent, so they are simulated in parallel and then ordered by rank,
/// which restores creation order.
pub fn recover_merges(ranks: &RankTable) -> Result<MergeTable> {
    if ranks.has_duplicate_ranks() {
        return Err(GptokError::malformed(
            TokenId::MAX,
            "several byte strings share a rank",
        ));
    }
    let mut recovered: Vec<(Pair, TokenId)> = ranks
        .iter()
        .collect::<Vec<_>>()
        .par_iter()
        .filter(|(token, _)| token.len() > 1)
        .map(|&(token, rank)| recover_pair(ranks, token, rank).map(|pair| (pair, rank)))
        .collect::<Result<_>>()?;
    recovered.sort_unstable_by_key(|&(_, rank)| rank);
    let merges = MergeTable::from_entries(recovered).map_err(|err| match err {
        GptokError::Internal(reason) => GptokError::malformed(TokenId::MAX, reason),
        other => other,
    })?;
    debug!(
        "recovered {} merges from {} ranked tokens",
        merges.len(),
        ranks.len()
    );
    Ok(merges)
}

/// Builds a model equivalent to the external rank table, including its [`ByteRemap`].
///
/// The vocabulary lives in the provider's rank space: `vocab[r] == [r]` for `r < 256`, and
/// callers restore raw bytes through the remap.
pub fn build_from_external_vocab(ranks: &RankTable) -> Result<BpeModel> {
    let remap = ByteRemap::from_ranks(ranks)?;
    let merges = recover_merges(ranks)?;
    Ok(BpeModel::new(merges).with_byte_remap(remap))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Single bytes ranked in reverse order plus a few merged tokens.
    fn reversed_table() -> RankTable {
        let mut table = RankTable::from_entries((0..=u8::MAX).map(|b| (vec![b], 255 - TokenId::from(b))));
        table.insert(b"aa".to_vec(), 256);
        table.insert(b"aaa".to_vec(), 257);
        table.insert(b"aaab".to_vec(), 258);
        table
    }

    #[test]
    fn byte_remap_is_a_bijection() {
        let remap = ByteRemap::from_ranks(&reversed_table()).unwrap();
        assert_eq!(remap.forward(b'a'), 255 - b'a');
        assert_eq!(remap.inverse(remap.forward(b'z')), b'z');
        assert_eq!(remap.restore(&remap.apply(b"hello")), b"hello");
        assert!(!remap.is_identity());
        assert!(ByteRemap::identity().is_identity());
    }

    #[test]
    fn byte_remap_rejects_missing_and_out_of_range_bytes() {
        let partial = RankTable::from_entries((0..200u8).map(|b| (vec![b], TokenId::from(b))));
        assert!(matches!(
            ByteRemap::from_ranks(&partial),
            Err(GptokError::MalformedExternalVocabulary { .. })
        ));
        let shifted = RankTable::from_entries((0..=u8::MAX).map(|b| (vec![b], TokenId::from(b) + 1)));
        assert!(ByteRemap::from_ranks(&shifted).is_err());
    }

    #[test]
    fn recovers_pairs_in_rank_space() {
        let table = reversed_table();
        let merges = recover_merges(&table).unwrap();
        let a = 255 - TokenId::from(b'a');
        let b = 255 - TokenId::from(b'b');
        assert_eq!(
            merges.entries(),
            &[((a, a), 256), ((256, a), 257), ((257, b), 258)]
        );
    }

    #[test]
    fn rank_limit_stops_before_the_token_itself() {
        let table = reversed_table();
        let parts = rank_limited_parts(&table, b"aaab", Some(258));
        assert_eq!(parts, vec![&b"aaa"[..], &b"b"[..]]);
        let whole = rank_limited_parts(&table, b"aaab", None);
        assert_eq!(whole, vec![&b"aaab"[..]]);
    }

    #[test]
    fn unreachable_token_is_reported() {
        let mut table = reversed_table();
        // "xyz" cannot be built from any lower-ranked pair.
        table.insert(b"xyz".to_vec(), 259);
        let err = recover_merges(&table).expect_err("non-convergent entry");
        assert!(matches!(
            err,
            GptokError::MalformedExternalVocabulary { rank: 259, .. }
        ));
    }

    #[test]
    fn external_model_carries_remap() {
        let model = build_from_external_vocab(&reversed_table()).unwrap();
        assert_eq!(model.merges().len(), 3);
        assert!(model.byte_remap().is_some());
        let remap = model.byte_remap().unwrap();
        let rendered = model.vocab().get(258).unwrap();
        assert_eq!(remap.restore(rendered), b"aaab");
    }
}
