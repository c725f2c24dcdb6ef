//! Prevention rule engine
//!
//! Screens code and commands before they run. Rules are evaluated in
//! descending priority and every rule whose condition holds contributes;
//! the aggregate confidence is the maximum over contributing rules. A rule
//! that fails or panics is isolated, journaled as `rule_error`, and the
//! remaining rules still run.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::command::{block_decision, check_command, CommandChecks};
use super::rules::builtin_rules;
use crate::config::PreventionConfig;
use crate::learning::{ErrorCategory, EventType, LearningSystem};
use crate::types::clamp_unit;

/// Kind of content being screened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Python,
    Shell,
    Command,
    Text,
}

impl ContentType {
    /// Parse a caller-supplied content type name
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "python" | "py" => ContentType::Python,
            "shell" | "sh" | "bash" | "zsh" => ContentType::Shell,
            "command" | "cmd" => ContentType::Command,
            _ => ContentType::Text,
        }
    }

    /// Guess from a file extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") | Some("pyi") => ContentType::Python,
            Some("sh") | Some("bash") | Some("zsh") => ContentType::Shell,
            _ => ContentType::Text,
        }
    }

    /// Code that the Python-specific rules understand
    pub fn is_python(&self) -> bool {
        matches!(self, ContentType::Python)
    }

    /// Content that is executed by a shell
    pub fn is_shell_like(&self) -> bool {
        matches!(self, ContentType::Shell | ContentType::Command)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentType::Python => write!(f, "python"),
            ContentType::Shell => write!(f, "shell"),
            ContentType::Command => write!(f, "command"),
            ContentType::Text => write!(f, "text"),
        }
    }
}

/// Coarse risk bucket derived from aggregate confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.8 {
            RiskLevel::High
        } else if confidence > 0.6 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Where the screened content is going to run
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    pub cwd: Option<PathBuf>,
    pub file_path: Option<PathBuf>,
}

impl RuleContext {
    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            ..Default::default()
        }
    }
}

/// What a rule's action produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub action: String,
    pub suggestions: Vec<String>,
    pub confidence: f64,
}

/// A condition/action pair over raw content
pub trait PreventionRule: Send + Sync {
    fn rule_id(&self) -> &str;

    /// Category tag, e.g. `import_error` or `file_safety`
    fn pattern_type(&self) -> &str;

    /// Higher runs first
    fn priority(&self) -> i32;

    fn applies_to(&self, _content_type: ContentType) -> bool {
        true
    }

    fn condition(&self, content: &str, ctx: &RuleContext) -> anyhow::Result<bool>;

    fn action(&self, content: &str, ctx: &RuleContext) -> anyhow::Result<RuleOutcome>;
}

/// One rule's contribution to a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedPrevention {
    pub rule_id: String,
    pub pattern_type: String,
    pub action: String,
    pub suggestions: Vec<String>,
    pub confidence: f64,
}

/// Verdict for one piece of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreventionResult {
    pub content_type: ContentType,
    pub prevention_applied: Vec<AppliedPrevention>,
    pub recommendations: Vec<String>,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_checks: Option<CommandChecks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_block: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
}

impl PreventionResult {
    fn empty(content_type: ContentType) -> Self {
        Self {
            content_type,
            prevention_applied: vec![],
            recommendations: vec![],
            risk_level: RiskLevel::Low,
            confidence: 0.0,
            command_checks: None,
            should_block: None,
            block_reason: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.should_block.unwrap_or(false)
    }

    fn recommend(&mut self, text: &str) {
        if !self.recommendations.iter().any(|r| r == text) {
            self.recommendations.push(text.to_string());
        }
    }

    fn rule_ids(&self) -> Vec<&str> {
        self.prevention_applied.iter().map(|p| p.rule_id.as_str()).collect()
    }
}

/// Map a rule tag onto the learned error category it corresponds to
pub fn category_for_tag(tag: &str) -> Option<ErrorCategory> {
    ErrorCategory::CLASSIFIABLE.into_iter().find(|c| c.as_str() == tag)
}

/// Priority-ordered rule engine
pub struct PreventionEngine {
    rules: Vec<Box<dyn PreventionRule>>,
    config: PreventionConfig,
    learning: Option<Arc<LearningSystem>>,
}

impl PreventionEngine {
    /// Engine with the built-in rules
    pub fn new(config: PreventionConfig) -> Self {
        let rules = builtin_rules(&config);
        let mut engine = Self {
            rules,
            config,
            learning: None,
        };
        engine.sort_rules();
        engine
    }

    /// Consult and journal into a learning system
    pub fn with_learning(mut self, learning: Arc<LearningSystem>) -> Self {
        self.learning = Some(learning);
        self
    }

    /// Add a caller rule, keeping priority order
    pub fn add_rule(&mut self, rule: Box<dyn PreventionRule>) {
        debug!(rule_id = %rule.rule_id(), priority = rule.priority(), "Adding prevention rule");
        self.rules.push(rule);
        self.sort_rules();
    }

    /// Rule ids in evaluation order
    pub fn rule_ids(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.rule_id().to_string()).collect()
    }

    pub fn config(&self) -> &PreventionConfig {
        &self.config
    }

    fn sort_rules(&mut self) {
        // stable: equal priorities keep insertion order
        self.rules.sort_by_key(|r| std::cmp::Reverse(r.priority()));
    }

    /// Screen code or text before it is executed or written
    pub fn evaluate(&self, content: &str, content_type: ContentType, ctx: &RuleContext) -> PreventionResult {
        let result = self.run_rules(content, content_type, ctx);
        if result.risk_level > RiskLevel::Low {
            self.journal(
                EventType::ErrorPrevented,
                json!({
                    "content_type": content_type,
                    "risk_level": result.risk_level,
                    "rules": result.rule_ids(),
                }),
            );
        }
        result
    }

    /// Screen a command line before it is executed
    pub fn evaluate_command(&self, command: &str, args: &[String], cwd: Option<&Path>) -> PreventionResult {
        let full = if args.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", command, shell_words::join(args))
        };
        let ctx = RuleContext {
            cwd: cwd.map(Path::to_path_buf),
            ..Default::default()
        };

        let mut result = self.run_rules(&full, ContentType::Command, &ctx);

        if let (Some(learning), Some(program)) = (&self.learning, full.split_whitespace().next()) {
            for hint in learning.store().cli_hints(program) {
                result.recommend(&hint);
            }
        }

        let checks = check_command(&full, cwd, &self.config);
        let decision = block_decision(&checks, result.confidence, &self.config);
        for warning in &checks.warnings {
            result.recommend(&format!("Review shell usage: {}", warning));
        }

        result.command_checks = Some(checks);
        result.should_block = Some(decision.should_block);
        result.block_reason = decision.reason();

        if decision.should_block {
            info!(command = %crate::truncate_safe(&full, 80), "Blocked command: {}", decision.reasons.join("; "));
            self.journal(
                EventType::ErrorPrevented,
                json!({
                    "command": full,
                    "block_reason": result.block_reason,
                    "rules": result.rule_ids(),
                }),
            );
        }
        result
    }

    fn run_rules(&self, content: &str, content_type: ContentType, ctx: &RuleContext) -> PreventionResult {
        let mut result = PreventionResult::empty(content_type);

        for rule in &self.rules {
            if !rule.applies_to(content_type) {
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| -> anyhow::Result<Option<RuleOutcome>> {
                if !rule.condition(content, ctx)? {
                    return Ok(None);
                }
                rule.action(content, ctx).map(Some)
            }));

            let outcome = match outcome {
                Ok(Ok(Some(outcome))) => outcome,
                Ok(Ok(None)) => continue,
                Ok(Err(e)) => {
                    self.rule_error(rule.rule_id(), &format!("{:#}", e));
                    continue;
                }
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "rule panicked".to_string());
                    self.rule_error(rule.rule_id(), &message);
                    continue;
                }
            };

            let confidence = clamp_unit(outcome.confidence);
            debug!(rule_id = %rule.rule_id(), confidence, "Prevention rule applied");
            result.confidence = result.confidence.max(confidence);
            for suggestion in &outcome.suggestions {
                result.recommend(suggestion);
            }
            result.prevention_applied.push(AppliedPrevention {
                rule_id: rule.rule_id().to_string(),
                pattern_type: rule.pattern_type().to_string(),
                action: outcome.action,
                suggestions: outcome.suggestions,
                confidence,
            });
        }

        if let Some(learning) = &self.learning {
            let mut categories: Vec<ErrorCategory> = result
                .prevention_applied
                .iter()
                .filter_map(|p| category_for_tag(&p.pattern_type))
                .collect();
            categories.dedup();
            if !categories.is_empty() {
                for advice in learning
                    .store()
                    .learned_advice(&categories, self.config.learned_hint_confidence)
                {
                    result.recommend(&advice);
                }
            }
        }

        result.risk_level = RiskLevel::from_confidence(result.confidence);
        result
    }

    fn rule_error(&self, rule_id: &str, error: &str) {
        warn!(rule_id = %rule_id, "Prevention rule failed: {}", error);
        self.journal(EventType::RuleError, json!({ "rule_id": rule_id, "error": error }));
    }

    fn journal(&self, event_type: EventType, data: serde_json::Value) {
        if let Some(learning) = &self.learning {
            learning.record_learning_event(event_type, data);
        }
    }
}

impl Default for PreventionEngine {
    fn default() -> Self {
        Self::new(PreventionConfig::default())
    }
}
