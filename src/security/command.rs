//! Command safety checks
//!
//! Tokenizes a command line and reports destructive operations, network
//! access, working-directory validity and suspicious shell constructs. The
//! block decision combines these with the rule engine's confidence.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::PreventionConfig;

/// Programs that delete or overwrite data
const DESTRUCTIVE_COMMANDS: &[&str] = &[
    "rm", "rmdir", "del", "rd", "erase", "format", "fdisk", "mkfs", "dd", "shred", "wipefs",
];

/// Programs that reach the network
const NETWORK_COMMANDS: &[&str] = &[
    "curl", "wget", "ssh", "scp", "sftp", "rsync", "ftp", "telnet", "nc", "ncat", "netcat", "ping",
];

/// Shell constructs worth a second look
static SUSPICIOUS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r";", "command chaining with ';'"),
        (r"&&", "conditional chaining with '&&'"),
        (r"\|\|", "fallback chaining with '||'"),
        (r"(^|[^|])\|([^|]|$)", "output piped into another command"),
        (r"`", "backtick command substitution"),
        (r"\$\(", "command substitution with '$()'"),
        (r">", "output redirection"),
        (r"\|\s*(sudo\s+)?(sh|bash|zsh|python[0-9.]*)\b", "output piped into an interpreter"),
        (r"\beval\b", "eval of dynamically built input"),
        (r"\bsudo\b", "privilege escalation with sudo"),
    ]
    .into_iter()
    .map(|(pattern, message)| (Regex::new(pattern).unwrap(), message))
    .collect()
});

/// Result of the command sub-check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandChecks {
    pub destructive_operations: bool,
    pub network_operations: bool,
    /// Working directory exists and is a directory
    pub path_safety: bool,
    pub warnings: Vec<String>,
    /// Protected paths named as arguments of a destructive command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protected_targets: Vec<String>,
}

/// Whether to refuse execution, and every reason that contributed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockDecision {
    pub should_block: bool,
    pub reasons: Vec<String>,
}

impl BlockDecision {
    pub fn reason(&self) -> Option<String> {
        if self.reasons.is_empty() {
            None
        } else {
            Some(self.reasons.join("; "))
        }
    }
}

/// Split a command line into words, tolerating unbalanced quotes
pub fn tokenize(command: &str) -> (Vec<String>, bool) {
    match shell_words::split(command) {
        Ok(words) => (words, true),
        Err(_) => (command.split_whitespace().map(str::to_string).collect(), false),
    }
}

/// Words with shell operators split off, e.g. `a;rm` becomes `a`, `rm`
fn words(tokens: &[String]) -> Vec<&str> {
    tokens
        .iter()
        .flat_map(|t| t.split(|c| matches!(c, ';' | '|' | '&')))
        .filter(|w| !w.is_empty())
        .collect()
}

fn program_name(word: &str) -> String {
    let base = word.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(word).to_lowercase();
    base.strip_suffix(".exe").map(str::to_string).unwrap_or(base)
}

fn is_destructive(word: &str, config: &PreventionConfig) -> bool {
    let name = program_name(word);
    DESTRUCTIVE_COMMANDS.contains(&name.as_str())
        || name.starts_with("mkfs.")
        || config
            .extra_destructive_commands
            .iter()
            .any(|extra| extra.eq_ignore_ascii_case(&name))
}

fn normalize_target(path: &str) -> String {
    let path = path.trim();
    let path = match path.strip_suffix("/*") {
        Some("") => "/",
        Some(stripped) => stripped,
        None => path,
    };
    let trimmed = path.trim_end_matches(|c| c == '/' || c == '\\');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// Run the destructive, network, path and shell-construct checks
pub fn check_command(command: &str, cwd: Option<&Path>, config: &PreventionConfig) -> CommandChecks {
    let (tokens, balanced) = tokenize(command);
    let words = words(&tokens);

    let destructive_operations = words.iter().any(|w| is_destructive(w, config));
    let network_operations = command.contains("://")
        || words
            .iter()
            .any(|w| NETWORK_COMMANDS.contains(&program_name(w).as_str()));

    let mut protected_targets = Vec::new();
    if destructive_operations {
        let protected: Vec<String> = config.protected_paths.iter().map(|p| normalize_target(p)).collect();
        for word in words.iter().filter(|w| !w.starts_with('-')) {
            let target = normalize_target(word);
            if protected.contains(&target) && !protected_targets.contains(&word.to_string()) {
                protected_targets.push(word.to_string());
            }
        }
    }

    let path_safety = cwd.map_or(true, Path::is_dir);

    let mut warnings: Vec<String> = SUSPICIOUS
        .iter()
        .filter(|(re, _)| re.is_match(command))
        .map(|(_, message)| message.to_string())
        .collect();
    if !balanced {
        warnings.push("unbalanced quotes in command".to_string());
    }

    CommandChecks {
        destructive_operations,
        network_operations,
        path_safety,
        warnings,
        protected_targets,
    }
}

/// Evaluate the block conditions in their fixed order
pub fn block_decision(checks: &CommandChecks, confidence: f64, config: &PreventionConfig) -> BlockDecision {
    let mut reasons = Vec::new();

    if checks.destructive_operations && !checks.protected_targets.is_empty() {
        reasons.push(format!(
            "destructive operation targets protected path {}",
            checks.protected_targets.join(", ")
        ));
    }
    if checks.destructive_operations && confidence > config.destructive_block_confidence {
        reasons.push(format!(
            "destructive operation with risk confidence {:.2} above {:.2}",
            confidence, config.destructive_block_confidence
        ));
    }
    if !checks.path_safety {
        reasons.push("working directory does not exist or is not a directory".to_string());
    }
    if confidence > config.block_confidence {
        reasons.push(format!(
            "risk confidence {:.2} above {:.2}",
            confidence, config.block_confidence
        ));
    }
    if checks.warnings.len() >= config.max_warnings {
        reasons.push(format!(
            "{} suspicious shell constructs: {}",
            checks.warnings.len(),
            checks.warnings.join(", ")
        ));
    }

    BlockDecision {
        should_block: !reasons.is_empty(),
        reasons,
    }
}
