//! Learning system facade
//!
//! Owns the pattern store and the journal for one project and implements
//! the observe → classify → persist loop on top of them. Every public
//! operation returns a best-effort value; persistence trouble is logged and
//! the in-memory state keeps serving.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::behavior::{default_strategies, learn_command, BehaviorStrategy, CommandLearning};
use super::journal::{EventType, LearningEvent, LearningJournal, LearningStats};
use super::matcher::{best_match, PatternMatch, PreparedSignal};
use super::patterns::{ErrorPattern, NEW_PATTERN_MATCH_CONFIDENCE};
use super::store::{PatternState, PatternStore};
use super::templates::{classify_text, ErrorCategory, GENERIC_SUGGESTION};
use crate::config::{Config, LearningConfig};
use crate::types::FailureSignal;

/// Confidence change below which no `pattern_strengthened` event is written
const STRENGTHEN_EVENT_DELTA: f64 = 0.01;

/// What `restore_snapshot` found and merged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub snapshot_found: bool,
    /// Patterns added or replaced by the merge
    pub patterns_merged: usize,
    pub counters_adopted: bool,
    pub total_patterns: usize,
}

/// Pattern store + journal for one project
pub struct LearningSystem {
    store: PatternStore,
    journal: LearningJournal,
    strategies: Vec<BehaviorStrategy>,
    config: LearningConfig,
}

impl LearningSystem {
    /// Open the learning state of a project using its configuration
    pub fn open(project_root: &Path, config: &Config) -> Self {
        Self::open_in(config.state_dir(project_root), config.learning.clone())
    }

    /// Open learning state in an explicit directory and restore it
    pub fn open_in(state_dir: impl Into<PathBuf>, config: LearningConfig) -> Self {
        let state_dir = state_dir.into();
        let store = PatternStore::open(&state_dir, config.clone());
        let journal = LearningJournal::open(&state_dir, config.max_journal_events);
        let system = Self {
            store,
            journal,
            strategies: default_strategies(),
            config,
        };
        let report = system.restore_snapshot();
        debug!(?report, "Learning state restored");
        system
    }

    /// Replace the behavior strategy table
    pub fn with_strategies(mut self, strategies: Vec<BehaviorStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn store(&self) -> &PatternStore {
        &self.store
    }

    pub fn journal(&self) -> &LearningJournal {
        &self.journal
    }

    /// Classify a failure signal, strengthening or creating a pattern.
    ///
    /// A match at or above the threshold returns the pattern's own
    /// (updated) confidence. A newly created pattern is stored with the
    /// seed confidence but reported at `NEW_PATTERN_MATCH_CONFIDENCE`.
    /// Signals that fit no category return the `unknown_error` sentinel
    /// with zero confidence and create nothing.
    pub fn match_signal(&self, signal: &FailureSignal) -> PatternMatch {
        let prepared = PreparedSignal::new(signal);
        let mut state = self.store.lock();

        let best = best_match(&state.collections.error_patterns, &prepared)
            .map(|(pattern, score)| (pattern.pattern_id.clone(), score));

        if let Some((pattern_id, score)) = best {
            if score.score >= self.config.match_threshold {
                debug!(pattern_id = %pattern_id, score = score.score, "Signal matched learned pattern");
                return self.apply_match(state, &pattern_id, signal, score.score, score.matched_elements);
            }
        }

        let category = classify_text(prepared.text());
        let Some(template) = category.template() else {
            debug!("Signal fits no known category");
            return PatternMatch {
                pattern_id: ErrorCategory::UnknownError.to_string(),
                confidence: 0.0,
                matched_elements: vec![],
                prevention_suggestions: vec![GENERIC_SUGGESTION.to_string()],
            };
        };

        let mut pattern = ErrorPattern::from_signal(category, signal);
        if state.collections.error_patterns.contains_key(&pattern.pattern_id) {
            let pattern_id = pattern.pattern_id.clone();
            debug!(pattern_id = %pattern_id, "Signal scored under threshold against its own pattern");
            return self.apply_match(state, &pattern_id, signal, 0.0, vec![format!("category:{}", category)]);
        }

        pattern.related_pattern_ids = state
            .collections
            .error_patterns
            .values()
            .filter(|p| p.pattern_type == category)
            .map(|p| p.pattern_id.clone())
            .collect();

        let mut matched_elements = vec![format!("category:{}", category)];
        if template.regex_matches(prepared.text()) {
            matched_elements.push(format!("regex:{}", category));
        }

        let result = PatternMatch {
            pattern_id: pattern.pattern_id.clone(),
            confidence: NEW_PATTERN_MATCH_CONFIDENCE,
            matched_elements,
            prevention_suggestions: pattern.prevention_rules.clone(),
        };
        let event_data = json!({
            "pattern_id": pattern.pattern_id,
            "pattern_type": category,
            "signature": pattern.signature,
        });

        info!(pattern_id = %pattern.pattern_id, "Learned new {} pattern", category);
        state.collections.error_patterns.insert(pattern.pattern_id.clone(), pattern);
        state.touch();
        self.store.persist_error_patterns(&state);
        drop(state);

        self.journal.record_event(EventType::PatternLearned, event_data);
        self.after_mutation();
        result
    }

    fn apply_match(
        &self,
        mut state: std::sync::MutexGuard<'_, PatternState>,
        pattern_id: &str,
        signal: &FailureSignal,
        score: f64,
        matched_elements: Vec<String>,
    ) -> PatternMatch {
        let max_examples = self.config.max_examples;
        let Some(pattern) = state.collections.error_patterns.get_mut(pattern_id) else {
            warn!(pattern_id = %pattern_id, "Matched pattern vanished before update");
            return PatternMatch {
                pattern_id: pattern_id.to_string(),
                confidence: 0.0,
                matched_elements,
                prevention_suggestions: vec![],
            };
        };

        let delta = pattern.strengthen(signal, max_examples);
        let result = PatternMatch {
            pattern_id: pattern.pattern_id.clone(),
            confidence: pattern.confidence,
            matched_elements,
            prevention_suggestions: pattern.prevention_rules.clone(),
        };
        let frequency = pattern.frequency;

        state.touch();
        self.store.persist_error_patterns(&state);
        drop(state);

        self.journal.record_event(
            EventType::PatternApplied,
            json!({ "pattern_id": result.pattern_id, "score": score }),
        );
        if delta > STRENGTHEN_EVENT_DELTA {
            self.journal.record_event(
                EventType::PatternStrengthened,
                json!({
                    "pattern_id": result.pattern_id,
                    "confidence": result.confidence,
                    "frequency": frequency,
                }),
            );
        }
        self.after_mutation();
        result
    }

    /// Learn from one command run
    pub fn observe_command(
        &self,
        command: &str,
        success: bool,
        context: &HashMap<String, String>,
    ) -> Option<CommandLearning> {
        let mut state = self.store.lock();
        let learning = learn_command(
            &mut state,
            &self.strategies,
            command,
            success,
            context,
            self.config.command_history,
        )?;
        self.store.persist_cli_patterns(&state);
        if !learning.behaviors_updated.is_empty() {
            self.store.persist_behavior_patterns(&state);
        }
        drop(state);

        self.journal.record_event(
            EventType::CliPatternObserved,
            json!({
                "pattern_id": learning.cli_pattern_id,
                "success": success,
                "new": learning.new_cli_pattern,
            }),
        );
        for behavior in &learning.behaviors_updated {
            self.journal.record_event(
                EventType::BehaviorPatternUpdated,
                json!({ "pattern_id": behavior }),
            );
        }
        self.after_mutation();
        Some(learning)
    }

    /// Record an event on behalf of another subsystem
    pub fn record_learning_event(
        &self,
        event_type: impl Into<EventType>,
        event_data: serde_json::Value,
    ) -> LearningEvent {
        self.journal.record_event(event_type, event_data)
    }

    /// Write the full-state backup. Returns whether it reached disk.
    pub fn save_snapshot(&self) -> bool {
        let counters = self.journal.counters();
        let snapshot = {
            let state = self.store.lock();
            self.store.snapshot_of(&state, counters)
        };
        match self.store.write_snapshot(&snapshot) {
            Ok(path) => {
                debug!("Saved pattern snapshot to {}", path.display());
                true
            }
            Err(e) => {
                warn!("Failed to save pattern snapshot: {}", e);
                false
            }
        }
    }

    /// Merge the backup snapshot and the per-category files into memory.
    ///
    /// Patterns present in more than one source keep the most recently
    /// seen copy. Snapshot counters replace the journal's only when the
    /// snapshot's last learning update is newer.
    pub fn restore_snapshot(&self) -> RestoreReport {
        let snapshot = match self.store.read_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring unreadable pattern snapshot: {}", e);
                None
            }
        };
        let files = self.store.load_category_files();

        let mut report = RestoreReport {
            snapshot_found: snapshot.is_some(),
            ..Default::default()
        };

        let mut state = self.store.lock();
        if let Some(snapshot) = &snapshot {
            report.patterns_merged += state.collections.merge_latest(snapshot.collections.clone());
            if state.command_history.is_empty() {
                state.command_history = snapshot.command_history.iter().cloned().collect();
            }
            state.last_learning_update = state.last_learning_update.max(snapshot.last_learning_update);
        }
        report.patterns_merged += state.collections.merge_latest(files);
        report.total_patterns = state.collections.total();
        drop(state);

        if let Some(snapshot) = snapshot {
            report.counters_adopted = self
                .journal
                .adopt_counters_if_newer(snapshot.counters, snapshot.last_learning_update);
        }
        report
    }

    /// Derived learning statistics
    pub fn get_stats(&self) -> LearningStats {
        self.journal.get_stats()
    }

    fn after_mutation(&self) {
        if self.config.auto_snapshot {
            self.save_snapshot();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn system(dir: &TempDir) -> LearningSystem {
        LearningSystem::open_in(dir.path(), LearningConfig::default())
    }

    #[test]
    fn test_new_pattern_contract() {
        let dir = TempDir::new().unwrap();
        let system = system(&dir);
        let signal = FailureSignal::new("ImportError", "No module named 'foo'");

        let result = system.match_signal(&signal);
        assert!(result.pattern_id.starts_with("import_error_"));
        assert_eq!(result.confidence, NEW_PATTERN_MATCH_CONFIDENCE);

        let stored = system.store().error_pattern(&result.pattern_id).unwrap();
        assert_eq!(stored.confidence, crate::learning::NEW_PATTERN_SEED_CONFIDENCE);
        assert_eq!(system.get_stats().patterns_learned, 1);
    }

    #[test]
    fn test_unknown_signal_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let system = system(&dir);
        let result = system.match_signal(&FailureSignal::new("Panic", "segmentation fault"));
        assert!(result.is_unknown());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.prevention_suggestions.len(), 1);
        assert_eq!(system.store().pattern_counts().total(), 0);
    }

    #[test]
    fn test_repeat_match_emits_applied_and_strengthened() {
        let dir = TempDir::new().unwrap();
        let system = system(&dir);
        let signal = FailureSignal::new("TypeError", "unsupported operand type(s) for +: 'int' and 'str'");
        let first = system.match_signal(&signal);
        let second = system.match_signal(&signal);

        assert_eq!(first.pattern_id, second.pattern_id);
        assert!((second.confidence - 0.55).abs() < 1e-9);
        let stats = system.get_stats();
        assert_eq!(stats.patterns_applied, 1);
        assert_eq!(stats.event_type_distribution["pattern_strengthened"], 1);
    }

    #[test]
    fn test_related_patterns_recorded() {
        let dir = TempDir::new().unwrap();
        let system = system(&dir);
        let a = system.match_signal(&FailureSignal::new("ImportError", "No module named 'alpha'"));
        let b = system.match_signal(&FailureSignal::new("ModuleNotFoundError", "cannot import name 'Beta' from 'gamma.delta'"));
        assert_ne!(a.pattern_id, b.pattern_id);

        let stored = system.store().error_pattern(&b.pattern_id).unwrap();
        assert!(stored.related_pattern_ids.contains(&a.pattern_id));
    }

    #[test]
    fn test_observe_command_persists() {
        let dir = TempDir::new().unwrap();
        {
            let system = system(&dir);
            system.observe_command("make check", true, &HashMap::new()).unwrap();
        }
        let reopened = system(&dir);
        assert!(reopened.store().cli_pattern("cli_make").is_some());
        assert_eq!(reopened.store().behavior_patterns().len(), 1);
        assert_eq!(reopened.store().command_history().len(), 1);
    }

    #[test]
    fn test_save_snapshot_writes_backup() {
        let dir = TempDir::new().unwrap();
        let mut config = LearningConfig::default();
        config.auto_snapshot = false;
        let system = LearningSystem::open_in(dir.path(), config);
        system.match_signal(&FailureSignal::new("ImportError", "No module named 'foo'"));
        assert!(!dir.path().join(super::super::store::BACKUP_FILE).exists());
        assert!(system.save_snapshot());
        assert!(dir.path().join(super::super::store::BACKUP_FILE).exists());
    }
}
