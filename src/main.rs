//! mounttab - inspect Linux mount tables
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use mounttab::cli::{Cli, Commands};
use mounttab::config::ConfigManager;
use mounttab::error::MountResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Run the selected command; `Ok(false)` means nothing matched
fn run() -> MountResult<bool> {
    let cli = Cli::parse();

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("mounttab=warn"),
        1 => EnvFilter::new("mounttab=info"),
        _ => EnvFilter::new("mounttab=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load()?;

    match cli.command {
        Commands::List(args) => mounttab::cli::commands::list(args, &config).map(|()| true),
        Commands::Find(args) => mounttab::cli::commands::find(args, &config),
        Commands::Lock(args) => mounttab::cli::commands::lock(args, &config).map(|()| true),
        Commands::Config(args) => {
            mounttab::cli::commands::config(args, &config, &config_manager).map(|()| true)
        }
    }
}
