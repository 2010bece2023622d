mod cli;
mod commands;
mod config;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::config::LoggingConfig;

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

/// `Ok(true)` for an allowed check or a clean lint.
fn run() -> Result<bool> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config.
    let cfg = config::load(&cli.config)?;

    // 3. Init tracing-subscriber; RUST_LOG wins over the configured level.
    init_tracing(&cfg.logging);
    debug!(config_file = %cli.config.display(), ?cfg, "configuration loaded");

    // 4. Dispatch.
    let mut stdout = std::io::stdout().lock();
    match &cli.command {
        Command::Lint { rules } => {
            let rules = rules.as_deref().unwrap_or(cfg.rules_file.as_path());
            commands::lint(rules, &mut stdout)
        }
        Command::Check(args) => commands::check(&cfg, args, &mut stdout),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
