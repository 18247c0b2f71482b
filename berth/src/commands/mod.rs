// Command handlers for workspace operations

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use berth_orchestrator::WorkspaceManager;
use berth_templates::TemplateRegistry;
use serde_json::Value;
use tracing::debug;

use crate::cli::{Args, Command};
use crate::config::Config;

pub mod templates;
pub mod workspace;

/// Main command dispatcher
#[must_use = "command execution results should be handled"]
pub async fn execute_command(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref())?.with_overrides(&args);
    debug!(?config, "Configuration loaded");

    let registry = Arc::new(TemplateRegistry::builtin().context("Built-in template catalog is invalid")?);

    // Handle commands that don't need an engine first
    let value = match &args.command {
        Command::Templates { category } => {
            templates::handle_templates(&registry, category.as_deref())?
        }
        command => {
            let runtime = berth_runtime::connect_docker(&config.docker_settings())
                .map_err(|e| anyhow!(e.user_friendly()))?;
            let manager =
                WorkspaceManager::with_settings(runtime, registry, config.manager_settings());
            workspace::handle_workspace_command(&manager, command).await?
        }
    };

    print_json(&value)?;

    // Partial exec output is printed, but the command still failed.
    match value.get("error").and_then(Value::as_str) {
        Some(error) => Err(anyhow!("{error}")),
        None => Ok(()),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
