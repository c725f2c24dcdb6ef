//! Pattern data model
//!
//! Error, CLI-usage, and behavior patterns plus the bookkeeping each one
//! does when it is observed again.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

use super::templates::ErrorCategory;
use crate::types::{clamp_unit, FailureSignal};

/// Confidence a freshly created error pattern is stored with
pub const NEW_PATTERN_SEED_CONFIDENCE: f64 = 0.5;

/// Confidence reported to the caller for the event that created a pattern.
///
/// Higher than the seed so a first sighting is immediately actionable; the
/// stored pattern still starts at `NEW_PATTERN_SEED_CONFIDENCE`.
pub const NEW_PATTERN_MATCH_CONFIDENCE: f64 = 0.7;

/// Per-match confidence gain and its ceiling
pub const CONFIDENCE_STEP: f64 = 0.05;
pub const CONFIDENCE_CAP: f64 = 0.95;

/// Behavior confidence gain and its ceiling
pub const BEHAVIOR_CONFIDENCE_STEP: f64 = 0.1;
pub const BEHAVIOR_CONFIDENCE_CAP: f64 = 0.9;

const SIGNATURE_MAX_TOKENS: usize = 16;

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("number regex"));

/// Lower-case a piece of failure text and collapse digit runs so that line
/// numbers and sizes do not split otherwise identical failures.
pub fn normalize(text: &str) -> String {
    NUMBER_RE.replace_all(&text.to_lowercase(), "<n>").into_owned()
}

/// Whitespace tokens of the normalised text
pub fn tokens(text: &str) -> Vec<String> {
    normalize(text).split_whitespace().map(|s| s.to_string()).collect()
}

/// Build the matching signature for a signal
pub fn signature_for(signal: &FailureSignal) -> String {
    let head = format!("{} {}", signal.category_hint, signal.message);
    tokens(&head)
        .into_iter()
        .take(SIGNATURE_MAX_TOKENS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable id derived from the category and signature
pub fn pattern_id_for(category: ErrorCategory, signature: &str) -> String {
    let digest = Sha256::digest(signature.as_bytes());
    format!("{}_{}", category, &hex::encode(digest)[..12])
}

/// A snapshot of one observed failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalExample {
    pub timestamp: DateTime<Utc>,
    pub signal: FailureSignal,
}

/// A learned, recurring failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub pattern_id: String,
    pub pattern_type: ErrorCategory,
    pub signature: String,
    pub description: String,
    #[serde(default)]
    pub examples: Vec<SignalExample>,
    pub frequency: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub confidence: f64,
    #[serde(default)]
    pub prevention_rules: Vec<String>,
    #[serde(default)]
    pub related_pattern_ids: BTreeSet<String>,
}

impl ErrorPattern {
    /// Create a pattern from its first sighting
    pub fn from_signal(category: ErrorCategory, signal: &FailureSignal) -> Self {
        let signature = signature_for(signal);
        let now = Utc::now();
        let prevention_rules = category
            .template()
            .map(|t| t.prevention_rules())
            .unwrap_or_default();
        let description = match category.template() {
            Some(t) => format!("{}: {}", t.description, crate::truncate_safe(&signal.message, 120)),
            None => crate::truncate_safe(&signal.message, 120),
        };

        Self {
            pattern_id: pattern_id_for(category, &signature),
            pattern_type: category,
            signature,
            description,
            examples: vec![SignalExample { timestamp: now, signal: signal.clone() }],
            frequency: 1,
            first_seen: now,
            last_seen: now,
            confidence: NEW_PATTERN_SEED_CONFIDENCE,
            prevention_rules,
            related_pattern_ids: BTreeSet::new(),
        }
    }

    /// Apply one more sighting. Returns the confidence delta.
    pub fn strengthen(&mut self, signal: &FailureSignal, max_examples: usize) -> f64 {
        let before = self.confidence;
        let now = Utc::now();

        self.frequency += 1;
        self.last_seen = now.max(self.first_seen);
        self.examples.push(SignalExample { timestamp: now, signal: signal.clone() });
        truncate_front(&mut self.examples, max_examples);
        self.confidence = clamp_unit((self.confidence + CONFIDENCE_STEP).min(CONFIDENCE_CAP));

        self.confidence - before
    }

    /// Copy trimmed for the backup snapshot
    pub fn for_snapshot(&self, max_examples: usize) -> Self {
        let mut copy = self.clone();
        truncate_front(&mut copy.examples, max_examples);
        copy
    }
}

/// A learned command-usage pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliPattern {
    pub pattern_id: String,
    pub command_sequence: Vec<String>,
    /// Percentage in [0, 100]
    pub success_rate: f64,
    pub frequency: u64,
    #[serde(default)]
    pub context: HashMap<String, String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl CliPattern {
    pub fn new(program: &str) -> Self {
        let now = Utc::now();
        Self {
            pattern_id: cli_pattern_id(program),
            command_sequence: vec![program.to_string()],
            success_rate: 0.0,
            frequency: 0,
            context: HashMap::new(),
            first_seen: now,
            last_seen: now,
            recommendations: vec![],
        }
    }

    /// Fold one run into the online success average
    pub fn record_run(&mut self, success: bool) {
        self.frequency += 1;
        let previous_runs = (self.frequency - 1) as f64;
        let mut successful = (self.success_rate * previous_runs / 100.0).round();
        if success {
            successful += 1.0;
        }
        self.success_rate = (successful / self.frequency as f64 * 100.0).clamp(0.0, 100.0);
        self.last_seen = Utc::now().max(self.first_seen);
    }

    /// Add a recommendation unless it is already present
    pub fn recommend(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !self.recommendations.contains(&text) {
            self.recommendations.push(text);
        }
    }
}

pub fn cli_pattern_id(program: &str) -> String {
    format!("cli_{}", program.to_lowercase())
}

/// Kind of behavior a pattern captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    ErrorRecovery,
    SuccessfulWorkflow,
    ValidationFirst,
}

/// A learned working habit inferred from command observations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorPattern {
    pub pattern_id: String,
    pub pattern_type: BehaviorKind,
    pub description: String,
    pub frequency: u64,
    /// Capped at `BEHAVIOR_CONFIDENCE_CAP`
    pub confidence: f64,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub outcomes: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

impl BehaviorPattern {
    pub fn new(pattern_id: &str, kind: BehaviorKind, description: &str) -> Self {
        Self {
            pattern_id: pattern_id.to_string(),
            pattern_type: kind,
            description: description.to_string(),
            frequency: 0,
            confidence: NEW_PATTERN_SEED_CONFIDENCE - BEHAVIOR_CONFIDENCE_STEP,
            triggers: vec![],
            outcomes: vec![],
            recommendations: vec![],
            last_updated: Utc::now(),
        }
    }

    /// Record one observation; the first observation lands on the seed value
    pub fn observe(&mut self, trigger: &str, outcome: &str) {
        self.frequency += 1;
        self.confidence = (self.confidence + BEHAVIOR_CONFIDENCE_STEP).min(BEHAVIOR_CONFIDENCE_CAP);
        push_unique_bounded(&mut self.triggers, trigger);
        push_unique_bounded(&mut self.outcomes, outcome);
        self.last_updated = Utc::now();
    }
}

const MAX_BEHAVIOR_ITEMS: usize = 10;

fn push_unique_bounded(list: &mut Vec<String>, item: &str) {
    if item.is_empty() || list.iter().any(|s| s == item) {
        return;
    }
    list.push(item.to_string());
    truncate_front(list, MAX_BEHAVIOR_ITEMS);
}

/// Keep only the last `max` items
pub(crate) fn truncate_front<T>(items: &mut Vec<T>, max: usize) {
    if items.len() > max {
        let excess = items.len() - max;
        items.drain(..excess);
    }
}
