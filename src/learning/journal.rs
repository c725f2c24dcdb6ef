//! Learning Journal - append-only event log plus aggregate counters
//!
//! Events are appended one JSON object per line to `learning_history.jsonl`.
//! Once the file holds twice the configured event cap it is rewritten to the
//! newest `max_events` lines. Counters and the per-type distribution live
//! together in `learning_stats.json`; when that file is missing both are
//! rebuilt by replaying whatever history is retained.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::store::{write_atomic, write_json_atomic};

pub const HISTORY_FILE: &str = "learning_history.jsonl";
pub const STATS_FILE: &str = "learning_stats.json";

/// Kind of learning event.
///
/// Serialized as a plain snake_case string; unknown strings round-trip
/// through `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    PatternLearned,
    PatternApplied,
    PatternStrengthened,
    ErrorPrevented,
    RuleError,
    CliPatternObserved,
    BehaviorPatternUpdated,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::PatternLearned => "pattern_learned",
            EventType::PatternApplied => "pattern_applied",
            EventType::PatternStrengthened => "pattern_strengthened",
            EventType::ErrorPrevented => "error_prevented",
            EventType::RuleError => "rule_error",
            EventType::CliPatternObserved => "cli_pattern_observed",
            EventType::BehaviorPatternUpdated => "behavior_pattern_updated",
            EventType::Custom(name) => name,
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pattern_learned" => EventType::PatternLearned,
            "pattern_applied" => EventType::PatternApplied,
            "pattern_strengthened" => EventType::PatternStrengthened,
            "error_prevented" => EventType::ErrorPrevented,
            "rule_error" => EventType::RuleError,
            "cli_pattern_observed" => EventType::CliPatternObserved,
            "behavior_pattern_updated" => EventType::BehaviorPatternUpdated,
            _ => EventType::Custom(value),
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        EventType::from(value.to_string())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    #[serde(default)]
    pub event_data: serde_json::Value,
}

/// Aggregate counters, persisted in `learning_stats.json` and in the
/// snapshot. The distribution travels with the totals so both always
/// describe the same events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningCounters {
    #[serde(default)]
    pub patterns_learned: u64,
    #[serde(default)]
    pub patterns_applied: u64,
    #[serde(default)]
    pub errors_prevented: u64,
    #[serde(default)]
    pub total_learning_events: u64,
    #[serde(default)]
    pub event_type_distribution: BTreeMap<String, u64>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl LearningCounters {
    fn count(&mut self, event: &LearningEvent) {
        match event.event_type {
            EventType::PatternLearned => self.patterns_learned += 1,
            EventType::PatternApplied => self.patterns_applied += 1,
            EventType::ErrorPrevented => self.errors_prevented += 1,
            _ => {}
        }
        self.total_learning_events += 1;
        *self
            .event_type_distribution
            .entry(event.event_type.to_string())
            .or_insert(0) += 1;
        self.last_updated = Some(event.timestamp);
    }
}

/// Derived statistics for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningStats {
    pub patterns_learned: u64,
    pub patterns_applied: u64,
    pub errors_prevented: u64,
    pub total_learning_events: u64,
    /// applied / learned, 0 when nothing was learned
    pub pattern_utilization_rate: f64,
    /// prevented / applied, 0 when nothing was applied
    pub prevention_effectiveness: f64,
    pub event_type_distribution: BTreeMap<String, u64>,
    /// Events in the trailing 24 hours
    pub recent_activity: usize,
}

#[derive(Debug, Default)]
struct JournalState {
    counters: LearningCounters,
    events: VecDeque<LearningEvent>,
    /// Non-empty lines currently in the history file
    lines_on_disk: usize,
}

/// Append-only learning journal
pub struct LearningJournal {
    dir: PathBuf,
    max_events: usize,
    state: Mutex<JournalState>,
}

impl LearningJournal {
    /// Open the journal, replaying history and loading counters
    pub fn open(dir: impl Into<PathBuf>, max_events: usize) -> Self {
        let dir = dir.into();
        let journal = Self {
            dir,
            max_events: max_events.max(1),
            state: Mutex::new(JournalState::default()),
        };

        let (replayed, lines_on_disk) = journal.replay();
        let mut state = JournalState {
            lines_on_disk,
            ..Default::default()
        };
        let mut rebuilt = LearningCounters::default();
        for event in replayed {
            rebuilt.count(&event);
            state.events.push_back(event);
            if state.events.len() > journal.max_events {
                state.events.pop_front();
            }
        }

        state.counters = match journal.load_counters() {
            Some(counters) => counters,
            None => {
                if rebuilt.total_learning_events > 0 {
                    info!("Rebuilt learning counters from {} journal events", rebuilt.total_learning_events);
                }
                rebuilt
            }
        };

        if state.lines_on_disk > journal.compact_threshold() {
            journal.compact(&mut state);
        }
        *journal.lock() = state;
        journal
    }

    fn compact_threshold(&self) -> usize {
        self.max_events.saturating_mul(2)
    }

    fn lock(&self) -> MutexGuard<'_, JournalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.dir.join(STATS_FILE)
    }

    /// Append an event and update counters. I/O failures are logged only.
    pub fn record_event(&self, event_type: impl Into<EventType>, event_data: serde_json::Value) -> LearningEvent {
        let event = LearningEvent {
            timestamp: Utc::now(),
            event_type: event_type.into(),
            event_data,
        };

        let mut state = self.lock();
        state.counters.count(&event);
        state.events.push_back(event.clone());
        if state.events.len() > self.max_events {
            state.events.pop_front();
        }

        match self.append_line(&event) {
            Ok(()) => {
                state.lines_on_disk += 1;
                if state.lines_on_disk > self.compact_threshold() {
                    self.compact(&mut state);
                }
            }
            Err(e) => warn!("Failed to append learning event {}: {:#}", event.event_type, e),
        }
        if let Err(e) = write_json_atomic(&self.stats_path(), "learning stats", &state.counters) {
            warn!("Failed to write learning stats: {}", e);
        }

        debug!(event_type = %event.event_type, "Recorded learning event");
        event
    }

    /// Current counters
    pub fn counters(&self) -> LearningCounters {
        self.lock().counters.clone()
    }

    /// Replace the counters when `candidate` was updated more recently than
    /// the current ones. Returns whether the candidate was taken.
    pub fn adopt_counters_if_newer(&self, candidate: LearningCounters, candidate_updated: Option<DateTime<Utc>>) -> bool {
        let mut state = self.lock();
        let newer = match (candidate_updated, state.counters.last_updated) {
            (Some(candidate), Some(current)) => candidate > current,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if newer {
            state.counters = LearningCounters { last_updated: candidate_updated, ..candidate };
            if let Err(e) = write_json_atomic(&self.stats_path(), "learning stats", &state.counters) {
                warn!("Failed to write learning stats: {}", e);
            }
        }
        newer
    }

    /// Events kept in memory, oldest first
    pub fn recent_events(&self) -> Vec<LearningEvent> {
        self.lock().events.iter().cloned().collect()
    }

    /// Derived statistics
    pub fn get_stats(&self) -> LearningStats {
        let state = self.lock();
        let counters = &state.counters;
        let cutoff = Utc::now() - Duration::hours(24);

        LearningStats {
            patterns_learned: counters.patterns_learned,
            patterns_applied: counters.patterns_applied,
            errors_prevented: counters.errors_prevented,
            total_learning_events: counters.total_learning_events,
            pattern_utilization_rate: ratio(counters.patterns_applied, counters.patterns_learned),
            prevention_effectiveness: ratio(counters.errors_prevented, counters.patterns_applied),
            event_type_distribution: counters.event_type_distribution.clone(),
            recent_activity: state.events.iter().filter(|e| e.timestamp >= cutoff).count(),
        }
    }

    // --- File I/O ---

    /// Rewrite the history file to the events kept in memory
    fn compact(&self, state: &mut JournalState) {
        let mut text = String::new();
        for event in &state.events {
            match serde_json::to_string(event) {
                Ok(line) => {
                    text.push_str(&line);
                    text.push('\n');
                }
                Err(e) => warn!("Dropping unserializable event during compaction: {}", e),
            }
        }
        match write_atomic(&self.history_path(), text.as_bytes()) {
            Ok(()) => {
                debug!("Compacted journal from {} to {} lines", state.lines_on_disk, state.events.len());
                state.lines_on_disk = state.events.len();
            }
            Err(e) => warn!("Failed to compact learning journal: {}", e),
        }
    }

    fn append_line(&self, event: &LearningEvent) -> anyhow::Result<()> {
        use anyhow::Context;

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let line = serde_json::to_string(event).context("Failed to serialize event")?;
        let path = self.history_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        writeln!(file, "{}", line).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Read every well-formed line of the history file, along with the
    /// number of non-empty lines seen
    fn replay(&self) -> (Vec<LearningEvent>, usize) {
        let path = self.history_path();
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return (Vec::new(), 0),
            Err(e) => {
                warn!("Failed to open {}: {}", path.display(), e);
                return (Vec::new(), 0);
            }
        };

        let mut events = Vec::new();
        let mut lines = 0;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Stopping journal replay at line {}: {}", index + 1, e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            lines += 1;
            match serde_json::from_str::<LearningEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping malformed journal line {}: {}", index + 1, e),
            }
        }
        (events, lines)
    }

    fn load_counters(&self) -> Option<LearningCounters> {
        let path = self.stats_path();
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(counters) => Some(counters),
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_event_type_round_trip() {
        let json = serde_json::to_string(&EventType::PatternLearned).unwrap();
        assert_eq!(json, "\"pattern_learned\"");
        let custom: EventType = serde_json::from_str("\"improvement_cycle\"").unwrap();
        assert_eq!(custom, EventType::Custom("improvement_cycle".to_string()));
        assert_eq!(EventType::from("rule_error"), EventType::RuleError);
    }

    #[test]
    fn test_counters_and_ratios() {
        let dir = TempDir::new().unwrap();
        let journal = LearningJournal::open(dir.path(), 100);

        let stats = journal.get_stats();
        assert_eq!(stats.pattern_utilization_rate, 0.0);
        assert_eq!(stats.prevention_effectiveness, 0.0);

        journal.record_event(EventType::PatternLearned, json!({"pattern_id": "a"}));
        journal.record_event(EventType::PatternLearned, json!({"pattern_id": "b"}));
        journal.record_event(EventType::PatternApplied, json!({"pattern_id": "a"}));
        journal.record_event(EventType::ErrorPrevented, json!({}));

        let stats = journal.get_stats();
        assert_eq!(stats.patterns_learned, 2);
        assert_eq!(stats.total_learning_events, 4);
        assert_eq!(stats.pattern_utilization_rate, 0.5);
        assert_eq!(stats.prevention_effectiveness, 1.0);
        assert_eq!(stats.event_type_distribution["pattern_learned"], 2);
        assert_eq!(stats.recent_activity, 4);
    }

    #[test]
    fn test_malformed_lines_are_skipped_on_replay() {
        let dir = TempDir::new().unwrap();
        {
            let journal = LearningJournal::open(dir.path(), 100);
            journal.record_event(EventType::PatternLearned, json!({}));
        }
        let mut file = OpenOptions::new().append(true).open(dir.path().join(HISTORY_FILE)).unwrap();
        writeln!(file, "{{ this is not json").unwrap();
        writeln!(file, "{}", serde_json::to_string(&LearningEvent {
            timestamp: Utc::now(),
            event_type: EventType::PatternApplied,
            event_data: json!({}),
        }).unwrap()).unwrap();
        std::fs::remove_file(dir.path().join(STATS_FILE)).unwrap();

        let journal = LearningJournal::open(dir.path(), 100);
        let counters = journal.counters();
        assert_eq!(counters.patterns_learned, 1);
        assert_eq!(counters.patterns_applied, 1);
        assert_eq!(counters.total_learning_events, 2);
    }

    #[test]
    fn test_adopt_counters_only_when_newer() {
        let dir = TempDir::new().unwrap();
        let journal = LearningJournal::open(dir.path(), 100);
        journal.record_event(EventType::PatternLearned, json!({}));

        let stale = LearningCounters { patterns_learned: 40, ..Default::default() };
        let past = Utc::now() - Duration::days(1);
        assert!(!journal.adopt_counters_if_newer(stale.clone(), Some(past)));
        assert_eq!(journal.counters().patterns_learned, 1);

        let future = Utc::now() + Duration::seconds(5);
        assert!(journal.adopt_counters_if_newer(stale, Some(future)));
        assert_eq!(journal.counters().patterns_learned, 40);
    }

    #[test]
    fn test_history_file_is_compacted() {
        let dir = TempDir::new().unwrap();
        {
            let journal = LearningJournal::open(dir.path(), 3);
            for n in 0..50 {
                journal.record_event(EventType::PatternApplied, json!({ "n": n }));
            }
            let text = std::fs::read_to_string(journal.history_path()).unwrap();
            let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
            assert!(lines.len() <= 6, "history kept {} lines", lines.len());
            assert!(lines.len() >= 3);
            assert!(lines.last().unwrap().contains("\"n\":49"));
        }

        let reopened = LearningJournal::open(dir.path(), 3);
        assert_eq!(reopened.counters().patterns_applied, 50);
        let events = reopened.recent_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].event_data["n"], 49);
    }

    #[test]
    fn test_oversized_history_is_compacted_on_open() {
        let dir = TempDir::new().unwrap();
        {
            let journal = LearningJournal::open(dir.path(), 100);
            for _ in 0..20 {
                journal.record_event(EventType::RuleError, json!({}));
            }
        }
        let journal = LearningJournal::open(dir.path(), 4);
        let text = std::fs::read_to_string(journal.history_path()).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert_eq!(journal.get_stats().event_type_distribution["rule_error"], 20);
    }

    #[test]
    fn test_distribution_follows_adopted_counters() {
        let dir = TempDir::new().unwrap();
        let journal = LearningJournal::open(dir.path(), 100);
        journal.record_event(EventType::PatternLearned, json!({}));

        let mut distribution = BTreeMap::new();
        distribution.insert("pattern_learned".to_string(), 40);
        let candidate = LearningCounters {
            patterns_learned: 40,
            total_learning_events: 40,
            event_type_distribution: distribution,
            ..Default::default()
        };
        assert!(journal.adopt_counters_if_newer(candidate, Some(Utc::now() + Duration::seconds(5))));

        let stats = journal.get_stats();
        assert_eq!(stats.patterns_learned, 40);
        assert_eq!(stats.event_type_distribution["pattern_learned"], stats.patterns_learned);

        let reopened = LearningJournal::open(dir.path(), 100);
        assert_eq!(reopened.get_stats().event_type_distribution["pattern_learned"], 40);
    }

    #[test]
    fn test_memory_is_bounded() {
        let dir = TempDir::new().unwrap();
        let journal = LearningJournal::open(dir.path(), 3);
        for _ in 0..5 {
            journal.record_event(EventType::PatternApplied, json!({}));
        }
        assert_eq!(journal.recent_events().len(), 3);
        assert_eq!(journal.counters().patterns_applied, 5);
    }
}
