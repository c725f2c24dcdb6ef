//! Pattern Matcher - scores a failure signal against learned patterns
//!
//! Composite score per pattern:
//! - 0.4 when at least 80% of the signature tokens occur in the signal
//! - 0.3 scaled by the share of the category keywords found in the signal
//! - 0.3 when the category regex matches the signal

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::patterns::{tokens, ErrorPattern};
use crate::types::{clamp_unit, FailureSignal};

pub const SIGNATURE_WEIGHT: f64 = 0.4;
pub const KEYWORD_WEIGHT: f64 = 0.3;
pub const REGEX_WEIGHT: f64 = 0.3;

/// Share of signature tokens that must appear in the signal
pub const SIGNATURE_OVERLAP: f64 = 0.8;

/// Result handed back to the caller for one classified signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub confidence: f64,
    pub matched_elements: Vec<String>,
    pub prevention_suggestions: Vec<String>,
}

impl PatternMatch {
    pub fn is_unknown(&self) -> bool {
        self.pattern_id == super::templates::ErrorCategory::UnknownError.as_str()
    }
}

/// Score of one pattern against one signal
#[derive(Debug, Clone, PartialEq)]
pub struct MatchScore {
    pub score: f64,
    pub matched_elements: Vec<String>,
}

/// Signal text prepared once for scoring against many patterns
pub struct PreparedSignal {
    text: String,
    tokens: HashSet<String>,
}

impl PreparedSignal {
    pub fn new(signal: &FailureSignal) -> Self {
        let text = signal.text();
        let tokens = tokens(&text).into_iter().collect();
        Self { text, tokens }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Score a single pattern
pub fn score(pattern: &ErrorPattern, signal: &PreparedSignal) -> MatchScore {
    let mut total = 0.0;
    let mut matched = Vec::new();

    let signature_tokens = tokens(&pattern.signature);
    if !signature_tokens.is_empty() {
        let present = signature_tokens.iter().filter(|t| signal.tokens.contains(*t)).count();
        if present as f64 / signature_tokens.len() as f64 >= SIGNATURE_OVERLAP {
            total += SIGNATURE_WEIGHT;
            matched.push(format!("signature:{}/{}", present, signature_tokens.len()));
        }
    }

    if let Some(template) = pattern.pattern_type.template() {
        let hits = template.keyword_hits(&signal.text);
        if hits > 0 {
            total += KEYWORD_WEIGHT * template.keyword_ratio(&signal.text);
            matched.push(format!("keywords:{}/{}", hits, template.keywords.len()));
        }
        if template.regex_matches(&signal.text) {
            total += REGEX_WEIGHT;
            matched.push(format!("regex:{}", pattern.pattern_type));
        }
    }

    MatchScore {
        score: clamp_unit(total),
        matched_elements: matched,
    }
}

/// Best-scoring pattern across every category.
///
/// Only a strictly higher score replaces the current best, so on exact ties
/// the pattern that comes first in iteration order (ascending pattern id)
/// wins.
pub fn best_match<'a>(
    patterns: &'a BTreeMap<String, ErrorPattern>,
    signal: &PreparedSignal,
) -> Option<(&'a ErrorPattern, MatchScore)> {
    let mut best: Option<(&ErrorPattern, MatchScore)> = None;
    for pattern in patterns.values() {
        let candidate = score(pattern, signal);
        let better = match &best {
            Some((_, current)) => candidate.score > current.score,
            None => true,
        };
        if better {
            best = Some((pattern, candidate));
        }
    }
    best
}
