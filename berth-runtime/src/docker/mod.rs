// Docker Engine adapter, split into logical modules

pub mod convert;
pub mod session;

pub use session::{ExecSession, LogReader};

// Standard library
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

// External crates
use async_trait::async_trait;
use bollard::container::{
    CreateContainerOptions, ListContainersOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::TryStreamExt;
use tracing::{debug, info, instrument, warn};

// Internal imports
use crate::capture::CaptureLimits;
use crate::error::{Result, RuntimeError};
use crate::{ContainerRuntime, ContainerSpec, ContainerSummary, ExecOutput, LabelSelector};

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection and lifecycle knobs for the Docker adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerSettings {
    /// Engine control socket.
    pub socket_path: PathBuf,
    /// Per-request timeout enforced by the HTTP client.
    pub request_timeout: Duration,
    /// Grace period before the engine kills a stopping container.
    pub stop_timeout: Duration,
    /// Pull the image when `create` reports it missing.
    pub pull_missing_images: bool,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            pull_missing_images: true,
        }
    }
}

/// [`ContainerRuntime`] backed by the Docker Engine API over a local socket.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    settings: DockerSettings,
}

impl DockerRuntime {
    /// Build a client for the configured socket. Connecting is lazy; use
    /// [`ContainerRuntime::ping`] to check reachability.
    pub fn connect(settings: &DockerSettings) -> Result<Self> {
        let socket = settings.socket_path.to_string_lossy();
        let docker = Docker::connect_with_socket(
            &socket,
            settings.request_timeout.as_secs(),
            API_DEFAULT_VERSION,
        )
        .map_err(|e| RuntimeError::EngineUnavailable(format!("{socket}: {e}")))?;

        debug!(socket = %socket, "Docker client configured");
        Ok(Self {
            docker,
            settings: settings.clone(),
        })
    }

    pub fn settings(&self) -> &DockerSettings {
        &self.settings
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(image, "Pulling missing image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_for_each(|progress| async move {
                if let Some(status) = progress.status {
                    debug!(status = %status, "pull");
                }
                Ok(())
            })
            .await
            .map_err(|e| engine_error("pull", image, e))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> std::result::Result<String, BollardError> {
        let options = CreateContainerOptions {
            name: spec.container_name(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), convert::container_config(spec))
            .await?;
        for warning in &response.warnings {
            warn!(container = %response.id, warning = %warning, "Engine warning on create");
        }
        Ok(response.id)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| engine_error("ping", "engine", e))
    }

    #[instrument(skip(self), fields(selector = ?selector.to_filters()))]
    async fn list_by_label(&self, selector: &LabelSelector) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([("label".to_string(), selector.to_filters())]),
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| engine_error("list", "containers", e))?;

        Ok(containers
            .into_iter()
            .filter_map(convert::summary_from_engine)
            .collect())
    }

    #[instrument(skip(self, spec), fields(name = %spec.workspace_name, image = %spec.image))]
    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        spec.validate()?;
        let name = spec.container_name();

        let id = match self.create_container(spec).await {
            Ok(id) => id,
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) if self.settings.pull_missing_images => {
                self.pull_image(&spec.image).await?;
                self.create_container(spec)
                    .await
                    .map_err(|e| engine_error("create", &name, e))?
            }
            Err(e) => return Err(engine_error("create", &name, e)),
        };

        info!(container = %id, "Container created");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| engine_error("start", id, e))
    }

    #[instrument(skip(self))]
    async fn stop(&self, id: &str) -> Result<()> {
        let options = StopContainerOptions {
            t: self.settings.stop_timeout.as_secs() as i64,
        };
        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| engine_error("stop", id, e))
    }

    #[instrument(skip(self))]
    async fn remove(&self, id: &str) -> Result<()> {
        // Never forced: removing a running container must fail, not kill it.
        let options = RemoveContainerOptions {
            force: false,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| engine_error("remove", id, e))
    }

    #[instrument(skip(self, limits))]
    async fn logs(&self, id: &str, tail: usize, limits: &CaptureLimits) -> Result<String> {
        LogReader::new(&self.docker, id, tail).read(limits).await
    }

    #[instrument(skip(self, limits))]
    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        limits: &CaptureLimits,
    ) -> Result<ExecOutput> {
        ExecSession::new(&self.docker, id, argv).run(limits).await
    }
}

/// Normalize an engine failure for `operation` on `target`.
pub(crate) fn engine_error(operation: &'static str, target: &str, err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            404 => RuntimeError::NotFound(target.to_string()),
            304 => RuntimeError::AlreadyInState {
                id: target.to_string(),
                state: match operation {
                    "start" => "running",
                    "stop" => "stopped",
                    _ => "in the requested state",
                },
            },
            409 => RuntimeError::Conflict(message),
            400 => RuntimeError::Invalid(message),
            _ => RuntimeError::Engine {
                status: status_code,
                message,
            },
        },
        BollardError::RequestTimeoutError => {
            RuntimeError::Timeout(format!("{operation} {target}"))
        }
        other => RuntimeError::EngineUnavailable(other.to_string()),
    }
}
