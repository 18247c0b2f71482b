//! Container runtime abstraction library.
//!
//! This library defines the [`ContainerRuntime`] trait, the only way the rest
//! of berth talks to a container engine, together with the Docker Engine
//! adapter and bounded helpers for exec and log capture.

// Standard library
use std::sync::Arc;

// External crates
use async_trait::async_trait;
use serde::Serialize;

// Re-export common types for convenience
pub use capture::{CaptureEnd, CaptureLimits, Captured};
pub use common::{ContainerSpec, ContainerState, ContainerSummary, PortMapping};
pub use error::{Result, RuntimeError};
pub use labels::LabelSelector;

pub mod capture;
pub mod common;
pub mod error;
pub mod labels;

#[cfg(feature = "docker")]
pub mod docker;

// Engine double, compiled for our own tests and for dependents that enable
// the `test-helpers` feature.
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

/// Result of a command run inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    /// stdout and stderr concatenated; relative interleaving is unspecified.
    pub output: String,
    /// Exit code, when the command ran to completion and the engine reported one.
    pub exit_code: Option<i64>,
    pub end: CaptureEnd,
}

impl ExecOutput {
    pub fn from_capture(captured: Captured, exit_code: Option<i64>) -> Self {
        Self {
            output: captured.output,
            exit_code,
            end: captured.end,
        }
    }
}

/// The contract every container engine adapter implements.
///
/// Implementations hold no inventory of their own: [`list_by_label`] always
/// asks the engine.
///
/// [`list_by_label`]: ContainerRuntime::list_by_label
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Get the name of the adapter (e.g., "docker", "mock").
    fn name(&self) -> &'static str;

    /// Check that the engine answers on its control channel.
    async fn ping(&self) -> Result<()>;

    /// List containers (running or not) whose labels satisfy `selector`.
    async fn list_by_label(&self, selector: &LabelSelector) -> Result<Vec<ContainerSummary>>;

    /// Create (but do not start) a container; returns the engine id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a container. Fails with `AlreadyInState` if it is running.
    async fn start(&self, id: &str) -> Result<()>;

    /// Stop a container. Fails with `AlreadyInState` if it is not running.
    async fn stop(&self, id: &str) -> Result<()>;

    /// Remove a stopped container.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Last `tail` lines of combined stdout/stderr logs. No follow mode.
    async fn logs(&self, id: &str, tail: usize, limits: &CaptureLimits) -> Result<String>;

    /// Run `argv` (never re-interpreted by a shell) and capture its output
    /// within `limits`.
    async fn exec(&self, id: &str, argv: &[String], limits: &CaptureLimits)
        -> Result<ExecOutput>;
}

/// Shared handle to a runtime adapter.
pub type SharedRuntime = Arc<dyn ContainerRuntime>;

/// Connect to the Docker engine described by `settings`.
#[cfg(feature = "docker")]
pub fn connect_docker(settings: &docker::DockerSettings) -> Result<SharedRuntime> {
    Ok(Arc::new(docker::DockerRuntime::connect(settings)?))
}
