//! Pattern Guard - learning failure classifier
//!
//! Command-line front end over the learning system and prevention engine.

use pattern_guard::cli;

fn main() -> anyhow::Result<()> {
    // Initialize logging (WARN level by default, use RUST_LOG=info for debug)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into())
        )
        .init();

    let code = cli::run()?;
    std::process::exit(code);
}
