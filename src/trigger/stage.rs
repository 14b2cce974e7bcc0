//! Trigger stage expressions
//!
//! A stage is a per-channel pattern such as `"X X 1 R"`: one term per
//! channel, leftmost character for the highest channel. Channels beyond the
//! pattern width are don't-care.

use super::TriggerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Match term for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Term {
    /// Level low
    Zero,
    /// Level high
    One,
    /// Don't care
    #[default]
    DontCare,
    /// Low on the previous sample, high now
    Rising,
    /// High on the previous sample, low now
    Falling,
    /// Either edge
    Change,
}

impl Term {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            '0' => Some(Term::Zero),
            '1' => Some(Term::One),
            'X' => Some(Term::DontCare),
            'R' => Some(Term::Rising),
            'F' => Some(Term::Falling),
            'C' => Some(Term::Change),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Term::Zero => '0',
            Term::One => '1',
            Term::DontCare => 'X',
            Term::Rising => 'R',
            Term::Falling => 'F',
            Term::Change => 'C',
        }
    }

    /// Whether this term needs the previous sample
    pub fn is_edge(self) -> bool {
        matches!(self, Term::Rising | Term::Falling | Term::Change)
    }

    /// Evaluate against the channel's level now and on the previous sample.
    /// Edge terms never match without a previous sample.
    #[inline]
    pub fn matches(self, prev: Option<bool>, cur: bool) -> bool {
        match self {
            Term::Zero => !cur,
            Term::One => cur,
            Term::DontCare => true,
            Term::Rising => prev == Some(false) && cur,
            Term::Falling => prev == Some(true) && !cur,
            Term::Change => prev.is_some_and(|p| p != cur),
        }
    }
}

/// Channel-indexed list of terms (`terms[n]` applies to channel `n`)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern {
    terms: Vec<Term>,
}

impl Pattern {
    /// Pattern that matches every sample
    pub fn any() -> Self {
        Self::default()
    }

    /// Build from channel-ordered terms
    pub fn from_terms(terms: Vec<Term>) -> Self {
        Self { terms }
    }

    /// Term for `channel`; channels past the pattern width are don't-care
    pub fn term(&self, channel: usize) -> Term {
        self.terms.get(channel).copied().unwrap_or_default()
    }

    /// Number of channels the pattern was written for
    pub fn width(&self) -> usize {
        self.terms.len()
    }

    /// Channels whose term is not don't-care, with their terms
    pub fn active_terms(&self) -> impl Iterator<Item = (usize, Term)> + '_ {
        self.terms
            .iter()
            .enumerate()
            .filter(|(_, t)| **t != Term::DontCare)
            .map(|(ch, t)| (ch, *t))
    }

    pub fn is_any(&self) -> bool {
        self.active_terms().next().is_none()
    }

    /// Highest channel referenced by a non-don't-care term
    pub fn highest_channel(&self) -> Option<usize> {
        self.active_terms().map(|(ch, _)| ch).last()
    }
}

impl FromStr for Pattern {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut terms = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| Term::from_char(c).ok_or(TriggerError::InvalidTerm(c)))
            .collect::<Result<Vec<_>, _>>()?;
        terms.reverse();
        Ok(Self { terms })
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for term in self.terms.iter().rev() {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}", term.as_char())?;
            first = false;
        }
        Ok(())
    }
}

impl TryFrom<String> for Pattern {
    type Error = TriggerError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Pattern> for String {
    fn from(p: Pattern) -> Self {
        p.to_string()
    }
}

/// How channel terms combine within a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    /// Every non-don't-care term must match
    #[default]
    And,
    /// Any non-don't-care term may match
    Or,
}

/// How a stage counts matches toward its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Matching samples are counted, mismatches in between are ignored
    #[default]
    Counter,
    /// Matches must be consecutive; a mismatch restarts the whole sequence
    Contiguous,
}

/// One step of a multi-stage trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerStage {
    pub pattern: Pattern,
    #[serde(default)]
    pub combinator: Combinator,
    /// Matches needed to complete the stage
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub kind: StageKind,
    /// Negate the combined match result
    #[serde(default)]
    pub invert: bool,
}

fn default_count() -> u32 {
    1
}

impl TriggerStage {
    /// Stage with threshold 1, AND combinator
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            combinator: Combinator::And,
            count: 1,
            kind: StageKind::Counter,
            invert: false,
        }
    }

    /// Parse a pattern string into a stage
    pub fn parse(pattern: &str) -> Result<Self, TriggerError> {
        Ok(Self::new(pattern.parse()?))
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_combinator(mut self, combinator: Combinator) -> Self {
        self.combinator = combinator;
        self
    }

    pub fn with_kind(mut self, kind: StageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = !self.invert;
        self
    }

    /// Evaluate against the current sample word and the previous one
    #[inline]
    pub fn matches(&self, prev: Option<u64>, cur: u64) -> bool {
        let mut terms = self.pattern.active_terms().peekable();
        let result = if terms.peek().is_none() {
            true
        } else {
            let mut eval = terms.map(|(ch, term)| {
                let bit = |word: u64| ch < 64 && (word >> ch) & 1 == 1;
                term.matches(prev.map(bit), bit(cur))
            });
            match self.combinator {
                Combinator::And => eval.all(|m| m),
                Combinator::Or => eval.any(|m| m),
            }
        };
        result != self.invert
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_parse_leftmost_is_highest() {
        let p: Pattern = "X X 1 R".parse().unwrap();
        assert_eq!(p.width(), 4);
        assert_eq!(p.term(0), Term::Rising);
        assert_eq!(p.term(1), Term::One);
        assert_eq!(p.term(3), Term::DontCare);
        assert_eq!(p.term(12), Term::DontCare);
        assert_eq!(p.to_string(), "X X 1 R");
        assert_eq!(p.highest_channel(), Some(1));

        let compact: Pattern = "xx1r".parse().unwrap();
        assert_eq!(compact, p);
    }

    #[test]
    fn test_pattern_rejects_unknown_term() {
        assert!(matches!("X Q".parse::<Pattern>(), Err(TriggerError::InvalidTerm('Q'))));
    }

    #[test]
    fn test_edge_terms_need_previous_sample() {
        assert!(!Term::Rising.matches(None, true));
        assert!(Term::Rising.matches(Some(false), true));
        assert!(!Term::Rising.matches(Some(true), true));
        assert!(Term::Falling.matches(Some(true), false));
        assert!(Term::Change.matches(Some(true), false));
        assert!(Term::Change.matches(Some(false), true));
        assert!(!Term::Change.matches(None, false));
        assert!(Term::DontCare.matches(None, false));
    }

    #[test]
    fn test_and_or_combinators() {
        let and = TriggerStage::parse("1 1").unwrap();
        assert!(and.matches(None, 0b11));
        assert!(!and.matches(None, 0b01));

        let or = and.clone().with_combinator(Combinator::Or);
        assert!(or.matches(None, 0b01));
        assert!(!or.matches(None, 0b00));
    }

    #[test]
    fn test_all_dont_care_matches_everything() {
        for combinator in [Combinator::And, Combinator::Or] {
            let stage = TriggerStage::parse("X X X").unwrap().with_combinator(combinator);
            assert!(stage.matches(None, 0));
            assert!(stage.matches(Some(5), 7));
        }
    }

    #[test]
    fn test_inverted_stage() {
        let stage = TriggerStage::parse("1").unwrap().inverted();
        assert!(stage.matches(None, 0));
        assert!(!stage.matches(None, 1));
    }

    #[test]
    fn test_stage_json_shape() {
        let stage: TriggerStage =
            serde_json::from_str(r#"{"pattern": "R X", "count": 3, "kind": "contiguous"}"#).unwrap();
        assert_eq!(stage.count, 3);
        assert_eq!(stage.kind, StageKind::Contiguous);
        assert_eq!(stage.combinator, Combinator::And);
        assert_eq!(stage.pattern.term(1), Term::Rising);

        let json = serde_json::to_string(&stage).unwrap();
        assert!(json.contains(r#""pattern":"R X""#));
    }
}
