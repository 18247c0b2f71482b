// Workspace lifecycle commands

use anyhow::{bail, Result};
use berth_orchestrator::{CreateWorkspaceRequest, OrchestratorError, WorkspaceManager};
use serde_json::{json, Value};
use tracing::debug;

use crate::cli::Command;

/// Resolve a workspace id or name to an id.
pub async fn resolve_target(manager: &WorkspaceManager, target: &str) -> Result<String> {
    match manager.get_workspace(target).await {
        Ok(workspace) => Ok(workspace.id),
        Err(OrchestratorError::NotFound(_)) => {
            debug!(target, "No workspace with that id, trying name");
            Ok(manager.find_workspace_by_name(target).await?.id)
        }
        Err(e) => Err(e.into()),
    }
}

/// Run a workspace command and return the JSON it prints.
pub async fn handle_workspace_command(manager: &WorkspaceManager, command: &Command) -> Result<Value> {
    let value = match command {
        Command::Ls => json!({ "workspaces": manager.list_workspaces().await? }),

        Command::Create {
            name,
            template,
            image,
            env,
            ports,
            features,
            no_start,
        } => {
            let req = CreateWorkspaceRequest {
                name: name.clone(),
                template: template.clone(),
                features: features.clone(),
                image: image.clone(),
                env: env.clone(),
                ports: ports.iter().copied().collect(),
            };
            let workspace = if *no_start {
                manager.create_workspace(req).await?
            } else {
                manager.deploy_workspace(req).await?
            };
            json!({ "id": workspace.id })
        }

        Command::Start { target } => {
            let id = resolve_target(manager, target).await?;
            manager.start_workspace(&id).await?;
            json!({ "success": true })
        }

        Command::Stop { target } => {
            let id = resolve_target(manager, target).await?;
            manager.stop_workspace(&id).await?;
            json!({ "success": true })
        }

        Command::Restart { target } => {
            let id = resolve_target(manager, target).await?;
            manager.restart_workspace(&id).await?;
            json!({ "success": true })
        }

        Command::Rm { target } => {
            let id = resolve_target(manager, target).await?;
            manager.remove_workspace(&id).await?;
            json!({ "success": true })
        }

        Command::Logs { target, tail } => {
            let id = resolve_target(manager, target).await?;
            json!({ "logs": manager.get_workspace_logs(&id, *tail).await? })
        }

        Command::Exec { target, command } => {
            let id = resolve_target(manager, target).await?;
            match manager.exec_in_workspace(&id, command).await {
                Ok(result) => json!({ "output": result.output, "exit_code": result.exit_code }),
                Err(e) => match e.partial_output() {
                    Some(output) => json!({ "output": output, "error": e.to_string() }),
                    None => return Err(e.into()),
                },
            }
        }

        Command::Inspect { target } => {
            let id = resolve_target(manager, target).await?;
            serde_json::to_value(manager.get_workspace(&id).await?)?
        }

        Command::Ping => {
            manager.ping().await?;
            json!({ "engine": "docker", "reachable": true })
        }

        Command::Templates { .. } => bail!("templates are listed without an engine"),
    };
    Ok(value)
}
