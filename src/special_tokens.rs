//! Reserved literal strings that bypass ordinary encoding.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use aho_corasick::{AhoCorasick, MatchKind};
use rustc_hash::FxHashMap;

use crate::error::{GptokError, Result};
use crate::model::TokenId;

/// Special tokens reserved by `cl100k_base`.
pub const GPT4_SPECIAL_TOKENS: [(&str, TokenId); 5] = [
    ("<|endoftext|>", 100_257),
    ("<|fim_prefix|>", 100_258),
    ("<|fim_middle|>", 100_259),
    ("<|fim_suffix|>", 100_260),
    ("<|endofprompt|>", 100_276),
];

/// Which special tokens `encode` may recognise in the input text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AllowedSpecial {
    /// Every configured special token.
    #[default]
    All,
    /// None; literals are encoded as ordinary text.
    None,
    /// None, and any configured literal in the text is an error.
    NoneRaise,
    /// Exactly the listed literals.
    Exactly(BTreeSet<String>),
}

impl AllowedSpecial {
    /// Builds an [`AllowedSpecial::Exactly`] policy.
    pub fn exactly<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exactly(tokens.into_iter().map(Into::into).collect())
    }
}

impl FromStr for AllowedSpecial {
    type Err = GptokError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Self::All),
            "none" => Ok(Self::None),
            "none_raise" => Ok(Self::NoneRaise),
            other => Err(GptokError::InvalidSpecialTokenPolicy(other.to_string())),
        }
    }
}

/// A piece of input text after special-token carving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'t> {
    /// Ordinary text to be split and BPE-encoded.
    Text(&'t str),
    /// A recognised special token.
    Special(TokenId),
}

/// Bijective `literal <-> id` table with a matcher over all literals.
#[derive(Debug, Clone)]
pub struct SpecialTokens {
    by_literal: BTreeMap<String, TokenId>,
    by_id: FxHashMap<TokenId, String>,
    matcher: Option<AhoCorasick>,
    literals: Vec<String>,
}

impl SpecialTokens {
    /// Builds the table, rejecting ids at or below `max_vocab_id` and duplicate ids.
    pub fn new(tokens: BTreeMap<String, TokenId>, max_vocab_id: TokenId) -> Result<Self> {
        let mut by_id = FxHashMap::default();
        for (literal, &id) in &tokens {
            if literal.is_empty() {
                return Err(GptokError::InvalidConfig(
                    "special token literal must not be empty".into(),
                ));
            }
            if id <= max_vocab_id {
                return Err(GptokError::SpecialTokenCollision {
                    token: literal.clone(),
                    id,
                    existing: format!("the learned vocabulary (ids 0..={max_vocab_id})"),
                });
            }
            if let Some(other) = by_id.insert(id, literal.clone()) {
                return Err(GptokError::SpecialTokenCollision {
                    token: literal.clone(),
                    id,
                    existing: format!("special token {other:?}"),
                });
            }
        }
        let literals: Vec<String> = tokens.keys().cloned().collect();
        let matcher = build_matcher(&literals)?;
        Ok(Self {
            by_literal: tokens,
            by_id,
            matcher,
            literals,
        })
    }

    /// An empty table.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            by_literal: BTreeMap::new(),
            by_id: FxHashMap::default(),
            matcher: None,
            literals: Vec::new(),
        }
    }

    /// Id of `literal`.
    #[must_use]
    pub fn id(&self, literal: &str) -> Option<TokenId> {
        self.by_literal.get(literal).copied()
    }

    /// Literal of `id`.
    #[must_use]
    pub fn literal(&self, id: TokenId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// The table ordered by literal.
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, TokenId> {
        &self.by_literal
    }

    /// Number of special tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_literal.len()
    }

    /// Returns `true` when no special token is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_literal.is_empty()
    }

    /// Splits `text` into ordinary spans and the special tokens eligible under `allowed`.
    pub fn segment<'t>(&self, text: &'t str, allowed: &AllowedSpecial) -> Result<Vec<Segment<'t>>> {
        match allowed {
            AllowedSpecial::None => Ok(vec![Segment::Text(text)]),
            AllowedSpecial::NoneRaise => {
                if let Some(found) = self.matcher.as_ref().and_then(|m| m.find(text)) {
                    let literal = &self.literals[found.pattern().as_usize()];
                    return Err(GptokError::DisallowedSpecialToken(literal.clone()));
                }
                Ok(vec![Segment::Text(text)])
            }
            AllowedSpecial::All => match &self.matcher {
                Some(matcher) => Ok(self.carve(text, matcher, &self.literals)),
                None => Ok(vec![Segment::Text(text)]),
            },
            AllowedSpecial::Exactly(subset) => {
                if let Some(unknown) = subset.iter().find(|s| !self.by_literal.contains_key(*s)) {
                    return Err(GptokError::InvalidSpecialTokenPolicy(format!(
                        "{unknown:?} is not a configured special token"
                    )));
                }
                let literals: Vec<String> = subset.iter().cloned().collect();
                match build_matcher(&literals)? {
                    Some(matcher) => Ok(self.carve(text, &matcher, &literals)),
                    None => Ok(vec![Segment::Text(text)]),
                }
            }
        }
    }

    fn carve<'t>(&self, text: &'t str, matcher: &AhoCorasick, literals: &[String]) -> Vec<Segment<'t>> {
        let mut segments = Vec::new();
        let mut last_end = 0usize;
        for found in matcher.find_iter(text) {
            if found.start() > last_end {
                segments.push(Segment::Text(&text[last_end..found.start()]));
            }
            let literal = &literals[found.pattern().as_usize()];
            segments.push(Segment::Special(self.by_literal[literal]));
            last_end = found.end();
        }
        if last_end < text.len() {
            segments.push(Segment::Text(&text[last_end..]));
        }
        segments
    }
}

fn build_matcher(literals: &[String]) -> Result<Option<AhoCorasick>> {
    if literals.is_empty() {
        return Ok(None);
    }
    let matcher = AhoCorasick::builder()
        .match_kind(MatchKind::LeftmostLongest)
        .build(literals)?;
    Ok(Some(matcher))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SpecialTokens {
        let tokens = BTreeMap::from([
            ("<|endoftext|>".to_string(), 1000),
            ("<|fim|>".to_string(), 1001),
        ]);
        SpecialTokens::new(tokens, 300).expect("valid special tokens")
    }

    #[test]
    fn policy_strings_parse() {
        assert_eq!("all".parse::<AllowedSpecial>().unwrap(), AllowedSpecial::All);
        assert_eq!("none".parse::<AllowedSpecial>().unwrap(), AllowedSpecial::None);
        let err = "some".parse::<AllowedSpecial>().expect_err("unknown policy");
        assert!(matches!(err, GptokError::InvalidSpecialTokenPolicy(p) if p == "some"));
    }

    #[test]
    fn carves_allowed_literals() {
        let segments = table()
            .segment("A<|endoftext|>B<|fim|>", &AllowedSpecial::All)
            .unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text("A"),
                Segment::Special(1000),
                Segment::Text("B"),
                Segment::Special(1001),
            ]
        );
    }

    #[test]
    fn subset_leaves_other_literals_as_text() {
        let allowed = AllowedSpecial::exactly(["<|fim|>"]);
        let segments = table().segment("<|endoftext|><|fim|>", &allowed).unwrap();
        assert_eq!(
            segments,
            vec![Segment::Text("<|endoftext|>"), Segment::Special(1001)]
        );
    }

    #[test]
    fn subset_with_unknown_literal_is_rejected() {
        let allowed = AllowedSpecial::exactly(["<|nope|>"]);
        assert!(matches!(
            table().segment("x", &allowed),
            Err(GptokError::InvalidSpecialTokenPolicy(_))
        ));
    }

    #[test]
    fn none_raise_reports_literal() {
        let err = table()
            .segment("a <|fim|> b", &AllowedSpecial::NoneRaise)
            .expect_err("literal present");
        assert!(matches!(err, GptokError::DisallowedSpecialToken(t) if t == "<|fim|>"));
        assert_eq!(
            table().segment("plain", &AllowedSpecial::NoneRaise).unwrap(),
            vec![Segment::Text("plain")]
        );
    }

    #[test]
    fn rejects_ids_inside_vocabulary_and_duplicates() {
        let low = BTreeMap::from([("<|x|>".to_string(), 200)]);
        assert!(matches!(
            SpecialTokens::new(low, 300),
            Err(GptokError::SpecialTokenCollision { id: 200, .. })
        ));
        let dup = BTreeMap::from([("<|x|>".to_string(), 400), ("<|y|>".to_string(), 400)]);
        assert!(SpecialTokens::new(dup, 300).is_err());
    }

    #[test]
    fn lookups_are_bijective() {
        let table = table();
        assert_eq!(table.id("<|fim|>"), Some(1001));
        assert_eq!(table.literal(1000), Some("<|endoftext|>"));
        assert_eq!(table.literal(5), None);
        assert_eq!(table.len(), 2);
    }
}
