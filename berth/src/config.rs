use anyhow::{bail, Context, Result};
use berth_orchestrator::ManagerSettings;
use berth_runtime::docker::DockerSettings;
use berth_runtime::CaptureLimits;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::cli::Args;

/// Runtime configuration. Each field falls back to its `BERTH_*` variable,
/// then to a built-in default; a config file overrides both.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_docker_socket")]
    pub docker_socket: PathBuf,

    #[serde(default = "default_engine_timeout")]
    pub engine_timeout_secs: u64,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    #[serde(default = "default_exec_max_output")]
    pub exec_max_output_bytes: usize,

    #[serde(default = "default_log_tail")]
    pub log_tail: usize,

    #[serde(default = "default_pull_missing_images")]
    pub pull_missing_images: bool,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn default_docker_socket() -> PathBuf {
    std::env::var("BERTH_DOCKER_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(berth_runtime::docker::DEFAULT_SOCKET_PATH))
}

fn default_engine_timeout() -> u64 {
    env_or("BERTH_ENGINE_TIMEOUT", 120)
}

fn default_stop_timeout() -> u64 {
    env_or("BERTH_STOP_TIMEOUT", 10)
}

fn default_exec_timeout() -> u64 {
    env_or("BERTH_EXEC_TIMEOUT", 30)
}

fn default_exec_max_output() -> usize {
    env_or("BERTH_EXEC_MAX_OUTPUT", 1024 * 1024) // 1 MiB
}

fn default_log_tail() -> usize {
    env_or("BERTH_LOG_TAIL", berth_orchestrator::DEFAULT_LOG_TAIL)
}

fn default_pull_missing_images() -> bool {
    env_or("BERTH_PULL_MISSING_IMAGES", true)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_socket: default_docker_socket(),
            engine_timeout_secs: default_engine_timeout(),
            stop_timeout_secs: default_stop_timeout(),
            exec_timeout_secs: default_exec_timeout(),
            exec_max_output_bytes: default_exec_max_output(),
            log_tail: default_log_tail(),
            pull_missing_images: default_pull_missing_images(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Load from `path` when given, otherwise from the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_yaml(&raw)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => Self::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        // An empty document means "all defaults".
        if raw.trim().is_empty() {
            return Ok(Self::from_env());
        }
        Ok(serde_yaml_ng::from_str(raw)?)
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, args: &Args) -> Self {
        if let Some(socket) = &args.docker_socket {
            self.docker_socket = socket.clone();
        }
        if let Some(secs) = args.exec_timeout {
            self.exec_timeout_secs = secs;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine_timeout_secs == 0 {
            bail!("engine_timeout_secs must be greater than zero");
        }
        if self.exec_timeout_secs == 0 {
            bail!("exec_timeout_secs must be greater than zero");
        }
        if self.exec_max_output_bytes == 0 {
            bail!("exec_max_output_bytes must be greater than zero");
        }
        Ok(())
    }

    pub fn docker_settings(&self) -> DockerSettings {
        DockerSettings {
            socket_path: self.docker_socket.clone(),
            request_timeout: Duration::from_secs(self.engine_timeout_secs),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            pull_missing_images: self.pull_missing_images,
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        let exec_timeout = Duration::from_secs(self.exec_timeout_secs);
        ManagerSettings {
            exec_limits: CaptureLimits::new(exec_timeout, self.exec_max_output_bytes),
            log_limits: CaptureLimits::new(
                Duration::from_secs(self.engine_timeout_secs),
                ManagerSettings::default().log_limits.max_bytes,
            ),
            default_log_tail: self.log_tail,
        }
    }
}
