//! Configuration management
//!
//! Manages learning thresholds, storage caps, and prevention limits.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the per-project configuration file
pub const PROJECT_CONFIG_FILE: &str = "pattern-guard.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pattern learning and persistence settings
    #[serde(default)]
    pub learning: LearningConfig,
    /// Prevention rule engine settings
    #[serde(default)]
    pub prevention: PreventionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// State directory, relative to the project root unless absolute
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Minimum match score for a signal to count as a known pattern
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    /// Examples kept per pattern in memory
    #[serde(default = "default_max_examples")]
    pub max_examples: usize,
    /// Examples kept per pattern in the backup snapshot
    #[serde(default = "default_snapshot_examples")]
    pub snapshot_examples: usize,
    /// Observed commands kept in memory
    #[serde(default = "default_command_history")]
    pub command_history: usize,
    /// Observed commands kept in the backup snapshot
    #[serde(default = "default_snapshot_command_history")]
    pub snapshot_command_history: usize,
    /// Journal events kept in memory for stats
    #[serde(default = "default_max_journal_events")]
    pub max_journal_events: usize,
    /// Write the backup snapshot after every mutation
    #[serde(default = "default_true")]
    pub auto_snapshot: bool,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".pattern_guard")
}

fn default_match_threshold() -> f64 {
    0.6
}

fn default_max_examples() -> usize {
    20
}

fn default_snapshot_examples() -> usize {
    10
}

fn default_command_history() -> usize {
    100
}

fn default_snapshot_command_history() -> usize {
    50
}

fn default_max_journal_events() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            match_threshold: default_match_threshold(),
            max_examples: default_max_examples(),
            snapshot_examples: default_snapshot_examples(),
            command_history: default_command_history(),
            snapshot_command_history: default_snapshot_command_history(),
            max_journal_events: default_max_journal_events(),
            auto_snapshot: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreventionConfig {
    /// Lines longer than this are reported by the styling rule
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Aggregate confidence above which any command is blocked
    #[serde(default = "default_block_confidence")]
    pub block_confidence: f64,
    /// Aggregate confidence above which a destructive command is blocked
    #[serde(default = "default_destructive_block_confidence")]
    pub destructive_block_confidence: f64,
    /// Number of shell warnings that blocks a command on its own
    #[serde(default = "default_max_warnings")]
    pub max_warnings: usize,
    /// Paths a destructive command may never target
    #[serde(default = "default_protected_paths")]
    pub protected_paths: Vec<String>,
    /// Command names treated as destructive in addition to the built-ins
    #[serde(default)]
    pub extra_destructive_commands: Vec<String>,
    /// Module names the import rule treats as always available
    #[serde(default)]
    pub known_modules: Vec<String>,
    /// Extra directories searched for importable modules
    #[serde(default)]
    pub module_search_paths: Vec<PathBuf>,
    /// Interpreter asked for its `sys.path`; empty disables the query
    #[serde(default = "default_python_interpreter")]
    pub python_interpreter: String,
    /// Minimum confidence of a learned pattern before its advice is surfaced
    #[serde(default = "default_learned_hint_confidence")]
    pub learned_hint_confidence: f64,
}

fn default_max_line_length() -> usize {
    100
}

fn default_block_confidence() -> f64 {
    0.85
}

fn default_destructive_block_confidence() -> f64 {
    0.6
}

fn default_max_warnings() -> usize {
    3
}

fn default_protected_paths() -> Vec<String> {
    ["/", "C:\\", "/root", "/etc", "/usr"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_python_interpreter() -> String {
    "python3".to_string()
}

fn default_learned_hint_confidence() -> f64 {
    0.7
}

impl Default for PreventionConfig {
    fn default() -> Self {
        Self {
            max_line_length: default_max_line_length(),
            block_confidence: default_block_confidence(),
            destructive_block_confidence: default_destructive_block_confidence(),
            max_warnings: default_max_warnings(),
            protected_paths: default_protected_paths(),
            extra_destructive_commands: vec![],
            known_modules: vec![],
            module_search_paths: vec![],
            python_interpreter: default_python_interpreter(),
            learned_hint_confidence: default_learned_hint_confidence(),
        }
    }
}

impl Config {
    /// Load configuration for a project.
    ///
    /// Looks for `pattern-guard.toml` in the project root, then the user
    /// config file, and falls back to defaults when neither exists.
    pub fn load_for_project(project_root: &Path) -> Result<Self> {
        let local = project_root.join(PROJECT_CONFIG_FILE);
        if local.exists() {
            return Self::load_from(&local);
        }

        if let Ok(user) = config_path() {
            if user.exists() {
                return Self::load_from(&user);
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Resolve the state directory for a project root
    pub fn state_dir(&self, project_root: &Path) -> PathBuf {
        if self.learning.state_dir.is_absolute() {
            self.learning.state_dir.clone()
        } else {
            project_root.join(&self.learning.state_dir)
        }
    }
}

/// Get the user configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "pattern-guard", "pattern-guard")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.learning.match_threshold, 0.6);
        assert_eq!(config.learning.max_examples, 20);
        assert_eq!(config.learning.snapshot_examples, 10);
        assert_eq!(config.prevention.max_warnings, 3);
        assert!(config.prevention.protected_paths.contains(&"/etc".to_string()));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[prevention]\nmax_line_length = 79\n").unwrap();
        assert_eq!(config.prevention.max_line_length, 79);
        assert_eq!(config.prevention.block_confidence, 0.85);
        assert_eq!(config.learning.state_dir, PathBuf::from(".pattern_guard"));
    }

    #[test]
    fn test_project_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.learning.max_examples = 5;
        config.save_to(&dir.path().join(PROJECT_CONFIG_FILE)).unwrap();

        let loaded = Config::load_for_project(dir.path()).unwrap();
        assert_eq!(loaded.learning.max_examples, 5);
    }

    #[test]
    fn test_state_dir_resolution() {
        let mut config = Config::default();
        let root = Path::new("/tmp/project");
        assert_eq!(config.state_dir(root), root.join(".pattern_guard"));

        config.learning.state_dir = PathBuf::from("/var/lib/guard");
        assert_eq!(config.state_dir(root), PathBuf::from("/var/lib/guard"));
    }

    #[test]
    fn test_default_config_toml_parses() {
        let text = default_config_toml();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.prevention.max_line_length, 100);
    }
}
