//! Pre-execution prevention
//!
//! Screens code and commands against a prioritized rule set before they
//! run, and decides whether a command must be blocked.

pub mod prevention;
pub mod rules;
pub mod command;
pub mod python_env;

pub use prevention::{
    category_for_tag, AppliedPrevention, ContentType, PreventionEngine, PreventionResult, PreventionRule,
    RiskLevel, RuleContext, RuleOutcome,
};
pub use command::{block_decision, check_command, BlockDecision, CommandChecks};
pub use rules::builtin_rules;
