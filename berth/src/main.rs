// External crates
use clap::Parser;
use tracing::{debug, error};

// Internal imports
use berth_logging::{init_subscriber, LogSettings};
use berth_orchestrator::OrchestratorError;

// Local modules
mod cli;
mod commands;
mod config;

use cli::Args;
use commands::execute_command;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Quiet by default: stdout carries JSON and only warnings reach stderr
    // unless LOG_LEVEL or --debug says otherwise.
    let mut log_settings = LogSettings::from_lookup(|key| {
        std::env::var(key)
            .ok()
            .or_else(|| (key == "LOG_LEVEL").then(|| "warn".to_string()))
    });
    if args.debug {
        log_settings = log_settings.verbose();
    }
    let _log_guard = init_subscriber(&log_settings);

    debug!(command = ?args.command, "Starting berth command");

    // Execute the command and handle any top-level errors
    if let Err(e) = execute_command(args).await {
        error!(error = %e, "Command failed");
        let message = match e.downcast_ref::<OrchestratorError>() {
            Some(err) => err.user_friendly(),
            None => format!("{e:#}"),
        };
        eprintln!("Error: {message}");
        std::process::exit(1);
    }
}
