use crate::error::{OrchestratorError, Result};
use berth_runtime::labels::{self, LabelSelector};
use berth_runtime::{
    CaptureEnd, CaptureLimits, ContainerRuntime, ContainerSpec, ContainerState, ContainerSummary,
    ExecOutput, RuntimeError,
};
use berth_templates::TemplateRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_LOG_TAIL: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    /// Template id, or `"custom"`.
    pub template: String,
    pub status: WorkspaceStatus,

    #[serde(serialize_with = "serialize_datetime")]
    pub created_at: DateTime<Utc>,

    /// Container port to published host binding (`ip:port`).
    pub ports: BTreeMap<u16, String>,
    pub labels: BTreeMap<String, String>,
    pub features: Vec<String>,
    pub image: String,
    pub container_id: String,
}

impl Workspace {
    /// Rebuild a workspace from its container. Containers without a workspace
    /// id label are not workspaces.
    pub fn from_summary(summary: ContainerSummary) -> Option<Self> {
        let id = summary.label(labels::WORKSPACE_ID_LABEL)?.to_string();
        let name = summary
            .label(labels::WORKSPACE_NAME_LABEL)
            .map(str::to_string)
            .unwrap_or_else(|| {
                summary
                    .name
                    .strip_prefix(&labels::container_name(""))
                    .unwrap_or(&summary.name)
                    .to_string()
            });
        let template = summary
            .label(labels::WORKSPACE_TYPE_LABEL)
            .unwrap_or(labels::CUSTOM_WORKSPACE_TYPE)
            .to_string();
        let features = summary
            .label(labels::WORKSPACE_FEATURES_LABEL)
            .map(labels::decode_features)
            .unwrap_or_default();

        Some(Self {
            id,
            name,
            template,
            status: WorkspaceStatus::from_state(summary.state),
            created_at: summary
                .created
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            ports: summary.published_ports(),
            features,
            image: summary.image,
            container_id: summary.id,
            labels: summary.labels,
        })
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkspaceStatus::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Creating,
    Running,
    Stopped,
    Removed,
}

impl WorkspaceStatus {
    /// Status of an existing container. A created-but-never-started container
    /// reads as stopped.
    pub fn from_state(state: ContainerState) -> Self {
        if state.is_running() {
            Self::Running
        } else {
            Self::Stopped
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    /// Template id; `None` creates a custom workspace from `image`.
    pub template: Option<String>,
    /// Added after the template's features.
    pub features: Vec<String>,
    /// Overrides the template image.
    pub image: Option<String>,
    /// `KEY=VALUE` entries; a key already set by the template is replaced.
    pub env: Vec<String>,
    /// Container port to host port; replaces template mappings per port.
    pub ports: BTreeMap<u16, u16>,
}

impl CreateWorkspaceRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// Bounds applied to exec and log capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    pub exec_limits: CaptureLimits,
    pub log_limits: CaptureLimits,
    pub default_log_tail: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            exec_limits: CaptureLimits::default(),
            log_limits: CaptureLimits::new(Duration::from_secs(30), 4 * 1024 * 1024),
            default_log_tail: DEFAULT_LOG_TAIL,
        }
    }
}

/// Workspace-level operations over a container runtime.
///
/// Holds no state of its own: every query goes to the engine.
#[derive(Clone)]
pub struct WorkspaceManager {
    runtime: Arc<dyn ContainerRuntime>,
    templates: Arc<TemplateRegistry>,
    settings: ManagerSettings,
}

impl WorkspaceManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, templates: Arc<TemplateRegistry>) -> Self {
        Self::with_settings(runtime, templates, ManagerSettings::default())
    }

    pub fn with_settings(
        runtime: Arc<dyn ContainerRuntime>,
        templates: Arc<TemplateRegistry>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            runtime,
            templates,
            settings,
        }
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Check that the engine is reachable.
    pub async fn ping(&self) -> Result<()> {
        self.runtime.ping().await.map_err(OrchestratorError::from)
    }

    /// Create a new workspace container without starting it.
    #[instrument(skip(self, req), fields(name = %req.name, template = ?req.template))]
    pub async fn create_workspace(&self, req: CreateWorkspaceRequest) -> Result<Workspace> {
        let id = Uuid::new_v4().to_string();
        let (spec, features) = self.build_spec(&id, &req)?;

        // The engine would reject the container name as well; checking the
        // name label first also catches workspaces whose container was renamed.
        let taken = LabelSelector::managed().with_value(labels::WORKSPACE_NAME_LABEL, &req.name);
        if !self.runtime.list_by_label(&taken).await?.is_empty() {
            return Err(OrchestratorError::Conflict(format!(
                "workspace '{}' already exists",
                req.name
            )));
        }

        let container_id = self.runtime.create(&spec).await?;
        info!(workspace = %id, container = %container_id, "Workspace created");
        let created_at = self.engine_created_at(&id).await;

        Ok(Workspace {
            id,
            name: req.name,
            template: spec.workspace_type.clone(),
            status: WorkspaceStatus::Creating,
            created_at,
            ports: spec
                .ports
                .iter()
                .map(|(container_port, host_port)| (*container_port, format!("0.0.0.0:{host_port}")))
                .collect(),
            labels: spec.all_labels(),
            features,
            image: spec.image,
            container_id,
        })
    }

    /// Create a workspace and start it.
    ///
    /// A failed start leaves the container in place; the workspace then reads
    /// as stopped and can be started or removed.
    pub async fn deploy_workspace(&self, req: CreateWorkspaceRequest) -> Result<Workspace> {
        let created = self.create_workspace(req).await?;
        self.start_workspace(&created.id).await
    }

    /// All managed workspaces, newest first.
    #[instrument(skip(self))]
    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let containers = self.runtime.list_by_label(&LabelSelector::managed()).await?;

        let mut workspaces: Vec<Workspace> = containers
            .into_iter()
            .filter(ContainerSummary::is_managed)
            .filter_map(|summary| {
                let name = summary.name.clone();
                let workspace = Workspace::from_summary(summary);
                if workspace.is_none() {
                    warn!(container = %name, "Managed container has no workspace id, skipping");
                }
                workspace
            })
            .collect();

        workspaces.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        debug!(count = workspaces.len(), "Listed workspaces");
        Ok(workspaces)
    }

    /// Get a single workspace by ID
    pub async fn get_workspace(&self, id: &str) -> Result<Workspace> {
        let container = self.find_container(id).await?;
        Workspace::from_summary(container)
            .ok_or_else(|| OrchestratorError::NotFound(format!("workspace '{id}'")))
    }

    pub async fn find_workspace_by_name(&self, name: &str) -> Result<Workspace> {
        let selector = LabelSelector::managed().with_value(labels::WORKSPACE_NAME_LABEL, name);
        self.runtime
            .list_by_label(&selector)
            .await?
            .into_iter()
            .find_map(Workspace::from_summary)
            .ok_or_else(|| OrchestratorError::NotFound(format!("workspace named '{name}'")))
    }

    /// Start a workspace. Starting a running workspace succeeds.
    #[instrument(skip(self))]
    pub async fn start_workspace(&self, id: &str) -> Result<Workspace> {
        let container = self.find_container(id).await?;
        match self.runtime.start(&container.id).await {
            Ok(()) => info!(workspace = %id, "Workspace started"),
            Err(e) if e.is_already_in_state() => debug!(workspace = %id, "Already running"),
            Err(e) => return Err(workspace_error(id, e)),
        }
        self.get_workspace(id).await
    }

    /// Stop a workspace. Stopping a stopped workspace succeeds.
    #[instrument(skip(self))]
    pub async fn stop_workspace(&self, id: &str) -> Result<Workspace> {
        let container = self.find_container(id).await?;
        self.stop_container(id, &container.id).await?;
        self.get_workspace(id).await
    }

    pub async fn restart_workspace(&self, id: &str) -> Result<Workspace> {
        self.stop_workspace(id).await?;
        self.start_workspace(id).await
    }

    /// Stop, then remove. The id never resolves again once this succeeds.
    #[instrument(skip(self))]
    pub async fn remove_workspace(&self, id: &str) -> Result<()> {
        let container = self.find_container(id).await?;
        self.stop_container(id, &container.id).await?;
        self.runtime
            .remove(&container.id)
            .await
            .map_err(|e| workspace_error(id, e))?;
        info!(workspace = %id, container = %container.id, "Workspace removed");
        Ok(())
    }

    /// Recent log text; `tail` defaults to the configured line count.
    #[instrument(skip(self))]
    pub async fn get_workspace_logs(&self, id: &str, tail: Option<usize>) -> Result<String> {
        let container = self.find_container(id).await?;
        let tail = tail.unwrap_or(self.settings.default_log_tail);
        self.runtime
            .logs(&container.id, tail, &self.settings.log_limits)
            .await
            .map_err(|e| workspace_error(id, e))
    }

    /// Run `argv` in a running workspace.
    ///
    /// Hitting the time or size bound is an error that still carries the
    /// output captured so far.
    #[instrument(skip(self))]
    pub async fn exec_in_workspace(&self, id: &str, argv: &[String]) -> Result<ExecOutput> {
        if argv.first().map_or(true, |program| program.is_empty()) {
            return Err(OrchestratorError::InvalidInput(
                "exec command is empty".to_string(),
            ));
        }

        let container = self.find_container(id).await?;
        let limits = &self.settings.exec_limits;
        let result = self
            .runtime
            .exec(&container.id, argv, limits)
            .await
            .map_err(|e| workspace_error(id, e))?;

        match result.end {
            CaptureEnd::Eof => {
                debug!(workspace = %id, exit_code = ?result.exit_code, "Exec finished");
                Ok(result)
            }
            CaptureEnd::TimedOut => Err(OrchestratorError::Timeout {
                operation: format!("exec in workspace '{id}' after {:?}", limits.timeout),
                output: result.output,
            }),
            CaptureEnd::LimitReached => Err(OrchestratorError::OutputLimit {
                limit: limits.max_bytes,
                output: result.output,
            }),
        }
    }

    async fn find_container(&self, id: &str) -> Result<ContainerSummary> {
        let selector = LabelSelector::managed().with_value(labels::WORKSPACE_ID_LABEL, id);
        self.runtime
            .list_by_label(&selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OrchestratorError::NotFound(format!("workspace '{id}'")))
    }

    /// Creation time as the engine records it, so later reads agree with the
    /// value returned from create.
    async fn engine_created_at(&self, id: &str) -> DateTime<Utc> {
        match self.find_container(id).await {
            Ok(summary) => summary
                .created
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .unwrap_or_else(Utc::now),
            Err(e) => {
                warn!(workspace = %id, error = %e, "Could not re-read created workspace");
                Utc::now()
            }
        }
    }

    async fn stop_container(&self, id: &str, container_id: &str) -> Result<()> {
        match self.runtime.stop(container_id).await {
            Ok(()) => {
                info!(workspace = %id, "Workspace stopped");
                Ok(())
            }
            Err(e) if e.is_already_in_state() => {
                debug!(workspace = %id, "Already stopped");
                Ok(())
            }
            Err(e) => Err(workspace_error(id, e)),
        }
    }

    /// Resolve the template, merge request overrides over its defaults and
    /// validate the result.
    fn build_spec(
        &self,
        id: &str,
        req: &CreateWorkspaceRequest,
    ) -> Result<(ContainerSpec, Vec<String>)> {
        let (workspace_type, mut image, mut env, mut ports, mut features) = match &req.template {
            Some(template_id) => {
                let template = self.templates.get(template_id)?;
                (
                    template.id.clone(),
                    template.image.clone(),
                    template.env.clone(),
                    template.ports.clone(),
                    template.features.clone(),
                )
            }
            None => (
                labels::CUSTOM_WORKSPACE_TYPE.to_string(),
                String::new(),
                Vec::new(),
                BTreeMap::new(),
                Vec::new(),
            ),
        };

        if let Some(override_image) = &req.image {
            image = override_image.clone();
        }
        merge_env(&mut env, &req.env);
        ports.extend(req.ports.iter().map(|(c, h)| (*c, *h)));
        for feature in &req.features {
            if feature.is_empty() || feature.trim() != feature || feature.contains(',') {
                return Err(OrchestratorError::InvalidInput(format!(
                    "invalid feature '{feature}': must be non-empty, without commas or surrounding whitespace"
                )));
            }
            if !features.contains(feature) {
                features.push(feature.clone());
            }
        }

        let spec = ContainerSpec {
            workspace_name: req.name.clone(),
            workspace_type,
            image,
            env,
            ports,
            labels: BTreeMap::from([
                (labels::WORKSPACE_ID_LABEL.to_string(), id.to_string()),
                (
                    labels::WORKSPACE_FEATURES_LABEL.to_string(),
                    labels::encode_features(&features),
                ),
            ]),
        };
        spec.validate()?;
        Ok((spec, features))
    }
}

/// Attribute a runtime failure on a workspace's container to the workspace.
fn workspace_error(id: &str, err: RuntimeError) -> OrchestratorError {
    match err {
        RuntimeError::NotFound(_) => OrchestratorError::NotFound(format!("workspace '{id}'")),
        other => other.into(),
    }
}

fn env_key(entry: &str) -> &str {
    entry.split_once('=').map_or(entry, |(key, _)| key)
}

/// Apply `overrides` to `env` in place, replacing entries with the same key.
fn merge_env(env: &mut Vec<String>, overrides: &[String]) {
    for entry in overrides {
        match env.iter().position(|existing| env_key(existing) == env_key(entry)) {
            Some(index) => env[index] = entry.clone(),
            None => env.push(entry.clone()),
        }
    }
}

// Serialize DateTime as RFC 3339 / ISO 8601 string
fn serialize_datetime<S>(dt: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&dt.to_rfc3339())
}
