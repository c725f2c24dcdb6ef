//! Learning failure classification
//!
//! Classifies failure signals against learned patterns, strengthens or
//! creates patterns, learns command habits, and journals every change so
//! the whole state survives restarts.

pub mod templates;
pub mod patterns;
pub mod matcher;
pub mod behavior;
pub mod store;
pub mod journal;
pub mod system;

pub use templates::{classify_text, CategoryTemplate, ErrorCategory};
pub use patterns::{
    BehaviorKind, BehaviorPattern, CliPattern, ErrorPattern, SignalExample,
    NEW_PATTERN_MATCH_CONFIDENCE, NEW_PATTERN_SEED_CONFIDENCE,
};
pub use matcher::PatternMatch;
pub use behavior::{default_strategies, BehaviorStrategy, CommandLearning, Observation};
pub use store::{CommandRecord, PatternCounts, PatternSnapshot, PatternStore, PersistError};
pub use journal::{EventType, LearningCounters, LearningEvent, LearningJournal, LearningStats};
pub use system::{LearningSystem, RestoreReport};
