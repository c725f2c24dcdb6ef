//! CLI interface for pattern-guard

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::learning::LearningSystem;
use crate::security::{ContentType, PreventionEngine, RuleContext};
use crate::types::FailureSignal;

/// Exit status of `check-command` when the command would be blocked
pub const EXIT_BLOCKED: i32 = 2;

#[derive(Parser)]
#[command(name = "pattern-guard")]
#[command(about = "Learn failure patterns and screen code and commands before they run", long_about = None)]
#[command(version)]
struct Cli {
    /// Project root holding the learning state
    #[arg(short, long, global = true, env = "PATTERN_GUARD_PROJECT", default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a failure and learn from it
    Classify {
        /// Caller's guess at the failure kind (e.g. ImportError)
        #[arg(short, long, default_value = "")]
        kind: String,
        /// Error message
        #[arg(short, long)]
        message: String,
        /// Traceback or stderr tail
        #[arg(short, long)]
        trace: Option<String>,
    },
    /// Record a command run for CLI and behavior learning
    Observe {
        /// The command line that was run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        /// The run failed
        #[arg(long)]
        failed: bool,
    },
    /// Screen a command before running it
    CheckCommand {
        /// Program or full command line
        command: String,
        /// Arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Directory the command would run in
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// Screen a source file before running it
    CheckFile {
        /// File to check
        path: PathBuf,
        /// python, shell, command or text (guessed from the extension by default)
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Show learning statistics
    Stats,
    /// Write the full-state backup now
    Snapshot,
    /// Merge the backup and category files back into the state
    Restore,
    /// Print the default configuration as TOML
    DefaultConfig,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_learning(project: &Path, config: &Config) -> Arc<LearningSystem> {
    Arc::new(LearningSystem::open(project, config))
}

/// Run the CLI and return the process exit status
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    let project = cli.project;
    let config = Config::load_for_project(&project)?;

    match cli.command {
        Commands::Classify { kind, message, trace } => {
            let learning = open_learning(&project, &config);
            let mut signal = FailureSignal::new(kind, message);
            if let Some(trace) = trace {
                signal = signal.with_trace(trace);
            }
            print_json(&learning.match_signal(&signal))?;
        }
        Commands::Observe { command, failed } => {
            let learning = open_learning(&project, &config);
            let line = command.join(" ");
            let context = [("cwd".to_string(), project.display().to_string())].into_iter().collect();
            match learning.observe_command(&line, !failed, &context) {
                Some(result) => print_json(&result)?,
                None => print_json(&serde_json::Value::Null)?,
            }
        }
        Commands::CheckCommand { command, args, cwd } => {
            let learning = open_learning(&project, &config);
            let engine = PreventionEngine::new(config.prevention.clone()).with_learning(learning);
            let cwd = cwd.unwrap_or_else(|| project.clone());
            let result = engine.evaluate_command(&command, &args, Some(&cwd));
            print_json(&result)?;
            if result.is_blocked() {
                return Ok(EXIT_BLOCKED);
            }
        }
        Commands::CheckFile { path, content_type } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let content_type = content_type
                .as_deref()
                .map(ContentType::parse)
                .unwrap_or_else(|| ContentType::from_path(&path));
            let ctx = RuleContext {
                cwd: Some(project.clone()),
                file_path: Some(path.clone()),
                ..Default::default()
            };
            let learning = open_learning(&project, &config);
            let engine = PreventionEngine::new(config.prevention.clone()).with_learning(learning);
            print_json(&engine.evaluate(&content, content_type, &ctx))?;
        }
        Commands::Stats => {
            let learning = open_learning(&project, &config);
            print_json(&learning.get_stats())?;
        }
        Commands::Snapshot => {
            let learning = open_learning(&project, &config);
            let saved = learning.save_snapshot();
            print_json(&serde_json::json!({
                "saved": saved,
                "state_dir": learning.store().state_dir(),
            }))?;
        }
        Commands::Restore => {
            let learning = open_learning(&project, &config);
            print_json(&learning.restore_snapshot())?;
        }
        Commands::DefaultConfig => {
            print!("{}", crate::config::default_config_toml());
        }
    }

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_check_command_keeps_hyphen_args() {
        let cli = Cli::parse_from(["pattern-guard", "check-command", "rm", "-rf", "/"]);
        match cli.command {
            Commands::CheckCommand { command, args, cwd } => {
                assert_eq!(command, "rm");
                assert_eq!(args, vec!["-rf", "/"]);
                assert!(cwd.is_none());
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_observe_joins_words() {
        let cli = Cli::parse_from(["pattern-guard", "--project", "/tmp/p", "observe", "--failed", "cargo", "test", "--all"]);
        assert_eq!(cli.project, PathBuf::from("/tmp/p"));
        match cli.command {
            Commands::Observe { command, failed } => {
                assert!(failed);
                assert_eq!(command.join(" "), "cargo test --all");
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
