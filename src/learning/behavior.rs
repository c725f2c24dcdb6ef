//! CLI usage and behavior learning
//!
//! Every observed command run updates the CLI pattern for its program and
//! is offered to a table of behavior strategies. A strategy is a predicate
//! plus the behavior pattern it strengthens, so new habits are a table
//! entry rather than another branch.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use super::patterns::{cli_pattern_id, BehaviorKind, BehaviorPattern, CliPattern};
use super::store::{CommandRecord, PatternState};

/// Runs before a CLI pattern is judged unreliable
const MIN_RUNS_FOR_ADVICE: u64 = 3;

/// Success rate (percent) under which a program is flagged
const LOW_SUCCESS_RATE: f64 = 50.0;

/// What a strategy gets to look at
pub struct Observation<'a> {
    pub command: &'a str,
    pub program: &'a str,
    pub success: bool,
    /// The run observed just before this one, if any
    pub previous: Option<&'a CommandRecord>,
}

/// Predicate → behavior pattern entry
pub struct BehaviorStrategy {
    pub pattern_id: &'static str,
    pub kind: BehaviorKind,
    pub description: &'static str,
    pub recommendation: &'static str,
    pub applies: fn(&Observation<'_>) -> bool,
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    let lower = text.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// Built-in strategies
pub fn default_strategies() -> Vec<BehaviorStrategy> {
    vec![
        BehaviorStrategy {
            pattern_id: "error_recovery",
            kind: BehaviorKind::ErrorRecovery,
            description: "Repair commands are run after failures",
            recommendation: "Capture the failing output before running repair commands",
            applies: |obs| !obs.success && contains_any(obs.command, &["fix", "repair"]),
        },
        BehaviorStrategy {
            pattern_id: "validation_first",
            kind: BehaviorKind::ValidationFirst,
            description: "Validation commands succeed before changes are applied",
            recommendation: "Keep running validation before applying changes",
            applies: |obs| obs.success && contains_any(obs.command, &["validate", "check"]),
        },
        BehaviorStrategy {
            pattern_id: "successful_workflow",
            kind: BehaviorKind::SuccessfulWorkflow,
            description: "A program succeeds right after it failed",
            recommendation: "Record what changed between the failed and the successful run",
            applies: |obs| {
                obs.success
                    && obs.previous.is_some_and(|prev| {
                        !prev.success && prev.command.split_whitespace().next() == Some(obs.program)
                    })
            },
        },
    ]
}

/// Outcome of one observation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandLearning {
    pub cli_pattern_id: String,
    pub new_cli_pattern: bool,
    pub success_rate: f64,
    pub behaviors_updated: Vec<String>,
}

/// Fold one command run into the state
pub fn learn_command(
    state: &mut PatternState,
    strategies: &[BehaviorStrategy],
    command: &str,
    success: bool,
    context: &HashMap<String, String>,
    history_cap: usize,
) -> Option<CommandLearning> {
    let program = command.split_whitespace().next()?.to_string();
    let id = cli_pattern_id(&program);

    let new_cli_pattern = !state.collections.cli_patterns.contains_key(&id);
    let pattern = state
        .collections
        .cli_patterns
        .entry(id.clone())
        .or_insert_with(|| CliPattern::new(&program));
    pattern.record_run(success);
    pattern.context.extend(context.iter().map(|(k, v)| (k.clone(), v.clone())));
    if pattern.frequency >= MIN_RUNS_FOR_ADVICE && pattern.success_rate < LOW_SUCCESS_RATE {
        pattern.recommend(format!(
            "'{}' fails in most runs; check `{} --help` and its arguments before running",
            program, program
        ));
    }
    let success_rate = pattern.success_rate;

    let matching: Vec<&BehaviorStrategy> = {
        let observation = Observation {
            command,
            program: &program,
            success,
            previous: state.command_history.back(),
        };
        strategies.iter().filter(|s| (s.applies)(&observation)).collect()
    };

    let mut behaviors_updated = Vec::new();
    for strategy in matching {
        let behavior = state
            .collections
            .behavior_patterns
            .entry(strategy.pattern_id.to_string())
            .or_insert_with(|| BehaviorPattern::new(strategy.pattern_id, strategy.kind, strategy.description));
        behavior.observe(command, if success { "success" } else { "failure" });
        if !behavior.recommendations.iter().any(|r| r == strategy.recommendation) {
            behavior.recommendations.push(strategy.recommendation.to_string());
        }
        debug!(pattern_id = %strategy.pattern_id, confidence = behavior.confidence, "Behavior pattern strengthened");
        behaviors_updated.push(strategy.pattern_id.to_string());
    }

    state.push_command(
        CommandRecord {
            command: command.to_string(),
            success,
            timestamp: Utc::now(),
        },
        history_cap,
    );
    state.touch();

    Some(CommandLearning {
        cli_pattern_id: id,
        new_cli_pattern,
        success_rate,
        behaviors_updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe(state: &mut PatternState, command: &str, success: bool) -> CommandLearning {
        learn_command(state, &default_strategies(), command, success, &HashMap::new(), 100).unwrap()
    }

    #[test]
    fn test_cli_pattern_keyed_by_program() {
        let mut state = PatternState::default();
        let first = observe(&mut state, "cargo build", true);
        assert!(first.new_cli_pattern);
        let second = observe(&mut state, "cargo test", false);
        assert!(!second.new_cli_pattern);
        assert_eq!(second.cli_pattern_id, "cli_cargo");
        assert_eq!(second.success_rate, 50.0);
        assert_eq!(state.collections.cli_patterns["cli_cargo"].command_sequence, vec!["cargo"]);
    }

    #[test]
    fn test_empty_command_is_ignored() {
        let mut state = PatternState::default();
        assert!(learn_command(&mut state, &default_strategies(), "   ", true, &HashMap::new(), 10).is_none());
        assert!(state.command_history.is_empty());
    }

    #[test]
    fn test_low_success_rate_recommendation() {
        let mut state = PatternState::default();
        for _ in 0..3 {
            observe(&mut state, "deploy --now", false);
        }
        let pattern = &state.collections.cli_patterns["cli_deploy"];
        assert_eq!(pattern.recommendations.len(), 1);
        assert!(pattern.recommendations[0].contains("--help"));
    }

    #[test]
    fn test_behavior_strategies() {
        let mut state = PatternState::default();
        let result = observe(&mut state, "npm run fix-lint", false);
        assert_eq!(result.behaviors_updated, vec!["error_recovery"]);

        let result = observe(&mut state, "npm run check", true);
        assert!(result.behaviors_updated.contains(&"validation_first".to_string()));
        assert!(result.behaviors_updated.contains(&"successful_workflow".to_string()));

        let recovery = &state.collections.behavior_patterns["error_recovery"];
        assert_eq!(recovery.frequency, 1);
        assert!(recovery.confidence <= 0.9);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = PatternState::default();
        for i in 0..5 {
            learn_command(&mut state, &default_strategies(), &format!("echo {i}"), true, &HashMap::new(), 3);
        }
        assert_eq!(state.command_history.len(), 3);
        assert_eq!(state.command_history.front().unwrap().command, "echo 2");
    }
}
