//! Workspace orchestration business logic
//!
//! This crate turns templates and ad-hoc requests into running containers and
//! manages their lifecycle. It keeps no database: workspaces are read back from
//! container labels on every call. It is consumed by the `berth` CLI but can
//! also be embedded by an HTTP layer or other entry points.

pub mod error;
pub mod workspace;

pub use error::{OrchestratorError, Result};
pub use workspace::{
    CreateWorkspaceRequest, ManagerSettings, Workspace, WorkspaceManager, WorkspaceStatus,
    DEFAULT_LOG_TAIL,
};
