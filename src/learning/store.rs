//! Pattern Store - the three pattern collections and their on-disk form
//!
//! Each collection lives in its own JSON object file keyed by pattern id
//! (`error_patterns.json`, `cli_patterns.json`, `behavior_patterns.json`).
//! A full-state snapshot goes to `patterns_backup.json`. Every write goes
//! through a temp file and a rename, so a crash never leaves a torn file.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::journal::LearningCounters;
use super::patterns::{cli_pattern_id, truncate_front, BehaviorPattern, CliPattern, ErrorPattern};
use super::templates::ErrorCategory;
use crate::config::LearningConfig;

pub const ERROR_PATTERNS_FILE: &str = "error_patterns.json";
pub const CLI_PATTERNS_FILE: &str = "cli_patterns.json";
pub const BEHAVIOR_PATTERNS_FILE: &str = "behavior_patterns.json";
pub const BACKUP_FILE: &str = "patterns_backup.json";

/// Failure while reading or writing pattern state
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One observed command run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub command: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// The three pattern collections.
///
/// `BTreeMap` keeps iteration in pattern-id order, which is what makes
/// match tie-breaking deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternCollections {
    #[serde(default)]
    pub error_patterns: BTreeMap<String, ErrorPattern>,
    #[serde(default)]
    pub cli_patterns: BTreeMap<String, CliPattern>,
    #[serde(default)]
    pub behavior_patterns: BTreeMap<String, BehaviorPattern>,
}

impl PatternCollections {
    pub fn total(&self) -> usize {
        self.error_patterns.len() + self.cli_patterns.len() + self.behavior_patterns.len()
    }

    /// Merge `incoming` into `self`, keeping the more recently seen copy of
    /// any pattern present on both sides. Returns the number of patterns
    /// that were new or replaced.
    pub fn merge_latest(&mut self, incoming: PatternCollections) -> usize {
        let mut changed = 0;
        changed += merge_by(&mut self.error_patterns, incoming.error_patterns, |p| p.last_seen);
        changed += merge_by(&mut self.cli_patterns, incoming.cli_patterns, |p| p.last_seen);
        changed += merge_by(&mut self.behavior_patterns, incoming.behavior_patterns, |p| p.last_updated);
        changed
    }
}

fn merge_by<T>(
    target: &mut BTreeMap<String, T>,
    incoming: BTreeMap<String, T>,
    stamp: impl Fn(&T) -> DateTime<Utc>,
) -> usize {
    let mut changed = 0;
    for (id, pattern) in incoming {
        let replace = match target.get(&id) {
            Some(existing) => stamp(&pattern) > stamp(existing),
            None => true,
        };
        if replace {
            target.insert(id, pattern);
            changed += 1;
        }
    }
    changed
}

/// Pattern counts per collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternCounts {
    pub error_patterns: usize,
    pub cli_patterns: usize,
    pub behavior_patterns: usize,
}

impl PatternCounts {
    pub fn total(&self) -> usize {
        self.error_patterns + self.cli_patterns + self.behavior_patterns
    }
}

/// Full in-memory state guarded by the store's lock
#[derive(Debug, Default)]
pub struct PatternState {
    pub collections: PatternCollections,
    pub command_history: VecDeque<CommandRecord>,
    pub last_learning_update: Option<DateTime<Utc>>,
}

impl PatternState {
    pub fn touch(&mut self) {
        self.last_learning_update = Some(Utc::now());
    }

    pub fn push_command(&mut self, record: CommandRecord, cap: usize) {
        self.command_history.push_back(record);
        while self.command_history.len() > cap {
            self.command_history.pop_front();
        }
    }
}

/// Contents of `patterns_backup.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSnapshot {
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub last_learning_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub collections: PatternCollections,
    #[serde(default)]
    pub counters: LearningCounters,
    #[serde(default)]
    pub command_history: Vec<CommandRecord>,
}

/// Raw snapshot shape, records still unvalidated
#[derive(Deserialize)]
struct RawSnapshot {
    saved_at: DateTime<Utc>,
    #[serde(default)]
    last_learning_update: Option<DateTime<Utc>>,
    #[serde(default)]
    collections: RawCollections,
    #[serde(default)]
    counters: LearningCounters,
    #[serde(default)]
    command_history: Vec<serde_json::Value>,
}

#[derive(Default, Deserialize)]
struct RawCollections {
    #[serde(default)]
    error_patterns: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    cli_patterns: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    behavior_patterns: serde_json::Map<String, serde_json::Value>,
}

/// Schema checks applied to every record read from disk
trait Validate {
    fn pattern_id(&self) -> &str;
    fn check(&self) -> Result<(), String>;
}

impl Validate for ErrorPattern {
    fn pattern_id(&self) -> &str {
        &self.pattern_id
    }

    fn check(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        if self.first_seen > self.last_seen {
            return Err("first_seen is after last_seen".to_string());
        }
        if self.frequency == 0 {
            return Err("frequency is zero".to_string());
        }
        Ok(())
    }
}

impl Validate for CliPattern {
    fn pattern_id(&self) -> &str {
        &self.pattern_id
    }

    fn check(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.success_rate) {
            return Err(format!("success_rate {} outside [0, 100]", self.success_rate));
        }
        if self.first_seen > self.last_seen {
            return Err("first_seen is after last_seen".to_string());
        }
        Ok(())
    }
}

impl Validate for BehaviorPattern {
    fn pattern_id(&self) -> &str {
        &self.pattern_id
    }

    fn check(&self) -> Result<(), String> {
        if !(0.0..=super::patterns::BEHAVIOR_CONFIDENCE_CAP + 1e-9).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 0.9]", self.confidence));
        }
        Ok(())
    }
}

/// Parse a keyed record map, skipping records that fail to deserialize or
/// validate
fn parse_records<T: DeserializeOwned + Validate>(
    raw: serde_json::Map<String, serde_json::Value>,
    source: &Path,
) -> BTreeMap<String, T> {
    let mut records = BTreeMap::new();
    for (key, value) in raw {
        let record: T = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(e) => {
                warn!(pattern_id = %key, "Skipping malformed record in {}: {}", source.display(), e);
                continue;
            }
        };
        if record.pattern_id() != key {
            warn!(pattern_id = %key, "Skipping record whose id does not match its key in {}", source.display());
            continue;
        }
        if let Err(reason) = record.check() {
            warn!(pattern_id = %key, "Skipping invalid record in {}: {}", source.display(), reason);
            continue;
        }
        records.insert(key, record);
    }
    records
}

/// Write bytes to `path` through a sibling temp file and a rename
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let io_err = |source| PersistError::Io { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, bytes).map_err(io_err)?;
    std::fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}

pub(crate) fn write_json_atomic<T: Serialize>(
    path: &Path,
    what: &'static str,
    value: &T,
) -> Result<(), PersistError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|source| PersistError::Serialize { what, source })?;
    write_atomic(path, &bytes)
}

fn read_json_object(path: &Path) -> Result<Option<serde_json::Map<String, serde_json::Value>>, PersistError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .map_err(|source| PersistError::Io { path: path.to_path_buf(), source })?;
    let map = serde_json::from_str(&text)
        .map_err(|source| PersistError::Parse { path: path.to_path_buf(), source })?;
    Ok(Some(map))
}

/// Persistent pattern store for one project
pub struct PatternStore {
    state_dir: PathBuf,
    config: LearningConfig,
    state: Mutex<PatternState>,
}

impl PatternStore {
    /// Open the store, loading whatever per-category files exist
    pub fn open(state_dir: impl Into<PathBuf>, config: LearningConfig) -> Self {
        let state_dir = state_dir.into();
        if let Err(e) = std::fs::create_dir_all(&state_dir) {
            warn!("Failed to create state directory {}: {}", state_dir.display(), e);
        }

        let store = Self {
            state_dir,
            config,
            state: Mutex::new(PatternState::default()),
        };

        let collections = store.load_category_files();
        info!(
            "Loaded {} error, {} cli, {} behavior patterns from {}",
            collections.error_patterns.len(),
            collections.cli_patterns.len(),
            collections.behavior_patterns.len(),
            store.state_dir.display()
        );
        store.lock().collections = collections;
        store
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Lock the state. A poisoned lock still yields the data: every
    /// mutation leaves the collections consistent before it can panic.
    pub(crate) fn lock(&self) -> MutexGuard<'_, PatternState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- Queries ---

    pub fn error_pattern(&self, pattern_id: &str) -> Option<ErrorPattern> {
        self.lock().collections.error_patterns.get(pattern_id).cloned()
    }

    pub fn error_patterns(&self) -> Vec<ErrorPattern> {
        self.lock().collections.error_patterns.values().cloned().collect()
    }

    pub fn cli_pattern(&self, pattern_id: &str) -> Option<CliPattern> {
        self.lock().collections.cli_patterns.get(pattern_id).cloned()
    }

    pub fn cli_patterns(&self) -> Vec<CliPattern> {
        self.lock().collections.cli_patterns.values().cloned().collect()
    }

    pub fn behavior_patterns(&self) -> Vec<BehaviorPattern> {
        self.lock().collections.behavior_patterns.values().cloned().collect()
    }

    pub fn command_history(&self) -> Vec<CommandRecord> {
        self.lock().command_history.iter().cloned().collect()
    }

    pub fn pattern_counts(&self) -> PatternCounts {
        let state = self.lock();
        PatternCounts {
            error_patterns: state.collections.error_patterns.len(),
            cli_patterns: state.collections.cli_patterns.len(),
            behavior_patterns: state.collections.behavior_patterns.len(),
        }
    }

    /// Recommendations learned for a program, plus a warning when it has
    /// mostly failed
    pub fn cli_hints(&self, program: &str) -> Vec<String> {
        let state = self.lock();
        let Some(pattern) = state.collections.cli_patterns.get(&cli_pattern_id(program)) else {
            return vec![];
        };
        let mut hints = Vec::new();
        if pattern.frequency >= 3 && pattern.success_rate < 50.0 {
            hints.push(format!(
                "'{}' succeeded in only {:.0}% of {} observed runs",
                program, pattern.success_rate, pattern.frequency
            ));
        }
        hints.extend(pattern.recommendations.iter().cloned());
        hints
    }

    /// Prevention rules of learned error patterns in `categories` whose
    /// confidence is at least `min_confidence`, deduplicated
    pub fn learned_advice(&self, categories: &[ErrorCategory], min_confidence: f64) -> Vec<String> {
        let state = self.lock();
        let mut advice: Vec<String> = Vec::new();
        for pattern in state.collections.error_patterns.values() {
            if !categories.contains(&pattern.pattern_type) || pattern.confidence < min_confidence {
                continue;
            }
            for rule in &pattern.prevention_rules {
                if !advice.contains(rule) {
                    advice.push(rule.clone());
                }
            }
        }
        advice
    }

    // --- Persistence ---

    fn path(&self, file: &str) -> PathBuf {
        self.state_dir.join(file)
    }

    /// Write the error-pattern file. Failures are logged, never raised.
    pub(crate) fn persist_error_patterns(&self, state: &PatternState) -> bool {
        self.persist(ERROR_PATTERNS_FILE, "error patterns", &state.collections.error_patterns)
    }

    pub(crate) fn persist_cli_patterns(&self, state: &PatternState) -> bool {
        self.persist(CLI_PATTERNS_FILE, "cli patterns", &state.collections.cli_patterns)
    }

    pub(crate) fn persist_behavior_patterns(&self, state: &PatternState) -> bool {
        self.persist(BEHAVIOR_PATTERNS_FILE, "behavior patterns", &state.collections.behavior_patterns)
    }

    fn persist<T: Serialize>(&self, file: &str, what: &'static str, value: &T) -> bool {
        match write_json_atomic(&self.path(file), what, value) {
            Ok(()) => {
                debug!("Persisted {} to {}", what, file);
                true
            }
            Err(e) => {
                warn!("Failed to persist {}: {}", what, e);
                false
            }
        }
    }

    /// Build the trimmed snapshot for the backup file
    pub(crate) fn snapshot_of(&self, state: &PatternState, counters: LearningCounters) -> PatternSnapshot {
        let examples = self.config.snapshot_examples;
        let collections = PatternCollections {
            error_patterns: state
                .collections
                .error_patterns
                .iter()
                .map(|(id, p)| (id.clone(), p.for_snapshot(examples)))
                .collect(),
            cli_patterns: state.collections.cli_patterns.clone(),
            behavior_patterns: state.collections.behavior_patterns.clone(),
        };
        let mut command_history: Vec<CommandRecord> = state.command_history.iter().cloned().collect();
        truncate_front(&mut command_history, self.config.snapshot_command_history);

        PatternSnapshot {
            saved_at: Utc::now(),
            last_learning_update: state.last_learning_update,
            collections,
            counters,
            command_history,
        }
    }

    pub(crate) fn write_snapshot(&self, snapshot: &PatternSnapshot) -> Result<PathBuf, PersistError> {
        let path = self.path(BACKUP_FILE);
        write_json_atomic(&path, "pattern snapshot", snapshot)?;
        Ok(path)
    }

    /// Read and validate the backup file; `Ok(None)` when it does not exist
    pub(crate) fn read_snapshot(&self) -> Result<Option<PatternSnapshot>, PersistError> {
        let path = self.path(BACKUP_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|source| PersistError::Io { path: path.clone(), source })?;
        let raw: RawSnapshot = serde_json::from_str(&text)
            .map_err(|source| PersistError::Parse { path: path.clone(), source })?;

        let command_history = raw
            .command_history
            .into_iter()
            .filter_map(|v| match serde_json::from_value::<CommandRecord>(v) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping malformed command record in snapshot: {}", e);
                    None
                }
            })
            .collect();

        Ok(Some(PatternSnapshot {
            saved_at: raw.saved_at,
            last_learning_update: raw.last_learning_update,
            collections: PatternCollections {
                error_patterns: parse_records(raw.collections.error_patterns, &path),
                cli_patterns: parse_records(raw.collections.cli_patterns, &path),
                behavior_patterns: parse_records(raw.collections.behavior_patterns, &path),
            },
            counters: raw.counters,
            command_history,
        }))
    }

    /// Load the three per-category files, skipping unreadable files and
    /// malformed records
    pub(crate) fn load_category_files(&self) -> PatternCollections {
        PatternCollections {
            error_patterns: self.load_file(ERROR_PATTERNS_FILE),
            cli_patterns: self.load_file(CLI_PATTERNS_FILE),
            behavior_patterns: self.load_file(BEHAVIOR_PATTERNS_FILE),
        }
    }

    fn load_file<T: DeserializeOwned + Validate>(&self, file: &str) -> BTreeMap<String, T> {
        let path = self.path(file);
        match read_json_object(&path) {
            Ok(Some(raw)) => parse_records(raw, &path),
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!("Ignoring unreadable pattern file: {}", e);
                BTreeMap::new()
            }
        }
    }
}
