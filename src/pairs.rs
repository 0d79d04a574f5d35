//! Adjacent-pair statistics and single-pass merge application.
//!
//! These two primitives are shared by the trainer, which picks the most frequent pair, and
//! by the encoder, which picks the earliest-learned pair.

use rustc_hash::FxHashMap;

use crate::model::{Pair, TokenId};

/// Adjacent-pair counts that remember the order in which each pair was first seen.
///
/// The first-seen order makes [`PairStats::most_frequent`] reproducible: when several pairs
/// share the maximum count, the one encountered earliest in the scan wins.
#[derive(Debug, Clone, Default)]
pub struct PairStats {
    counts: FxHashMap<Pair, usize>,
    order: Vec<Pair>,
}

impl PairStats {
    /// Creates empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every adjacent pair of `ids` to the statistics, overlapping occurrences included.
    pub fn extend_from(&mut self, ids: &[TokenId]) {
        for window in ids.windows(2) {
            let pair = (window[0], window[1]);
            let count = self.counts.entry(pair).or_insert_with(|| {
                self.order.push(pair);
                0
            });
            *count += 1;
        }
    }

    /// Returns the number of occurrences recorded for `pair`.
    #[must_use]
    pub fn count(&self, pair: Pair) -> usize {
        self.counts.get(&pair).copied().unwrap_or(0)
    }

    /// Number of distinct pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` when no pair has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates `(pair, count)` in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (Pair, usize)> + '_ {
        self.order.iter().map(|pair| (*pair, self.counts[pair]))
    }

    /// Returns the pair with the highest count, breaking ties by first-seen order.
    #[must_use]
    pub fn most_frequent(&self) -> Option<(Pair, usize)> {
        let mut best: Option<(Pair, usize)> = None;
        for (pair, count) in self.iter() {
            match best {
                Some((_, best_count)) if count <= best_count => {}
                _ => best = Some((pair, count)),
            }
        }
        best
    }
}

/// Counts adjacent pairs in a single id sequence.
#[must_use]
pub fn pair_stats(ids: &[TokenId]) -> PairStats {
    let mut stats = PairStats::new();
    stats.extend_from(ids);
    stats
}

/// Replaces every non-overlapping, left-to-right occurrence of `pair` with `replacement`.
///
/// After a replacement at position `i` the scan resumes at `i + 2`, so a token consumed by
/// one merge never takes part in another merge of the same pass.
#[must_use]
pub fn merge_pair(ids: &[TokenId], pair: Pair, replacement: TokenId) -> Vec<TokenId> {
    let mut merged = Vec::with_capacity(ids.len());
    let mut i = 0usize;
    while i < ids.len() {
        if i + 1 < ids.len() && ids[i] == pair.0 && ids[i + 1] == pair.1 {
            merged.push(replacement);
            i += 2;
        } else {
            merged.push(ids[i]);
            i += 1;
        }
    }
    merged
}

/// In-place variant of [`merge_pair`]; returns the number of replacements made.
pub fn merge_pair_in_place(ids: &mut Vec<TokenId>, pair: Pair, replacement: TokenId) -> usize {
    let len = ids.len();
    if len < 2 {
        return 0;
    }
    let mut read = 0usize;
    let mut write = 0usize;
    let mut merges = 0usize;
    while read < len {
        if read + 1 < len && ids[read] == pair.0 && ids[read + 1] == pair.1 {
            ids[write] = replacement;
            read += 2;
            merges += 1;
        } else {
            ids[write] = ids[read];
            read += 1;
        }
        write += 1;
    }
    ids.truncate(write);
    merges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_count_overlapping_pairs() {
        let stats = pair_stats(&[97, 97, 97, 98]);
        assert_eq!(stats.count((97, 97)), 2);
        assert_eq!(stats.count((97, 98)), 1);
        assert_eq!(stats.len(), 2);
    }

    #[test]
    fn stats_of_short_input_are_empty() {
        assert!(pair_stats(&[]).is_empty());
        assert!(pair_stats(&[42]).is_empty());
        assert_eq!(pair_stats(&[42]).most_frequent(), None);
    }

    #[test]
    fn ties_resolve_to_first_seen_pair() {
        // (3, 4) and (1, 2) both occur twice; (3, 4) is seen first.
        let stats = pair_stats(&[3, 4, 1, 2, 3, 4, 1, 2]);
        assert_eq!(stats.most_frequent(), Some(((3, 4), 2)));
    }

    #[test]
    fn extend_from_preserves_order_across_sequences() {
        let mut stats = PairStats::new();
        stats.extend_from(&[5, 6]);
        stats.extend_from(&[1, 2, 5, 6, 1, 2]);
        let order: Vec<_> = stats.iter().collect();
        assert_eq!(order[0], ((5, 6), 2));
        assert_eq!(stats.most_frequent(), Some(((5, 6), 2)));
    }

    #[test]
    fn merge_is_non_overlapping_left_to_right() {
        assert_eq!(merge_pair(&[1, 1, 1], (1, 1), 9), vec![9, 1]);
        assert_eq!(merge_pair(&[1, 2, 3, 1, 2], (1, 2), 7), vec![7, 3, 7]);
        assert_eq!(merge_pair(&[], (1, 2), 7), Vec::<TokenId>::new());
    }

    #[test]
    fn in_place_merge_matches_pure_merge() {
        let original = vec![1, 1, 1, 1, 2, 1, 1];
        let mut ids = original.clone();
        let merges = merge_pair_in_place(&mut ids, (1, 1), 300);
        assert_eq!(merges, 3);
        assert_eq!(ids, merge_pair(&original, (1, 1), 300));
    }
}
