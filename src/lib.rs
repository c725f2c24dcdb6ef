//! Pattern Guard - learning failure classification and prevention
//!
//! A subsystem that:
//! - Classifies failure signals against learned error patterns
//! - Strengthens or creates patterns with each observation
//! - Learns CLI usage and behavior habits from command runs
//! - Screens code and commands with a prioritized prevention rule set
//! - Journals every learning event and survives restarts
//!
//! # Example
//!
//! ```ignore
//! use pattern_guard::{Config, FailureSignal, LearningSystem};
//!
//! let config = Config::load_for_project(".".as_ref())?;
//! let system = LearningSystem::open(".".as_ref(), &config);
//! let result = system.match_signal(&FailureSignal::new("ImportError", "No module named 'yaml'"));
//! println!("{} ({:.2})", result.pattern_id, result.confidence);
//! ```

pub mod types;
pub mod config;
pub mod learning;
pub mod security;
pub mod cli;

pub use config::Config;
pub use types::FailureSignal;

pub use learning::{
    ErrorCategory,
    EventType,
    LearningStats,
    LearningSystem,
    PatternMatch,
    PatternStore,
};

pub use security::{
    ContentType,
    PreventionEngine,
    PreventionResult,
    PreventionRule,
    RiskLevel,
    RuleContext,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - learning failure classifier", NAME, VERSION)
}

/// Truncate to at most `max_len` characters on a char boundary, marking
/// the cut with "..."
pub fn truncate_safe(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_safe() {
        assert_eq!(truncate_safe("short", 10), "short");
        assert_eq!(truncate_safe("abcdefghij", 6), "abc...");
        assert_eq!(truncate_safe("ééééé", 4), "é...");
    }
}
