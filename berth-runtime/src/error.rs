//! Error types for container engine operations.
//!
//! Every adapter normalizes its engine-specific failures into [`RuntimeError`]
//! so callers can match on a small, engine-agnostic taxonomy.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while talking to the container engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Engine request timed out: {0}")]
    Timeout(String),

    #[error("Invalid container spec: {0}")]
    Invalid(String),

    /// The container is already in the requested state (engine answered 304).
    #[error("Container {id} is already {state}")]
    AlreadyInState { id: String, state: &'static str },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Engine error ({status}): {message}")]
    Engine { status: u16, message: String },
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_in_state(&self) -> bool {
        matches!(self, Self::AlreadyInState { .. })
    }

    /// Convert runtime error to user-friendly message with a hint
    pub fn user_friendly(&self) -> String {
        match self {
            Self::EngineUnavailable(detail) => format!(
                "Cannot reach the container engine ({detail})\n💡 Start Docker, or point BERTH_DOCKER_SOCKET at the engine socket"
            ),
            Self::Timeout(detail) => format!(
                "The container engine did not answer in time ({detail})\n💡 Raise BERTH_ENGINE_TIMEOUT if the engine is slow"
            ),
            _ => self.to_string(),
        }
    }
}
