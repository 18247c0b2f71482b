use berth_runtime::RuntimeError;
use berth_templates::TemplateError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Container engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The operation outlived its deadline; `output` holds whatever was
    /// captured before it was cut off.
    #[error("Timed out: {operation}")]
    Timeout { operation: String, output: String },

    /// Exec output exceeded `limit` bytes; `output` is the truncated capture.
    #[error("Output exceeded {limit} bytes")]
    OutputLimit { limit: usize, output: String },

    #[error("Runtime error: {0}")]
    Runtime(RuntimeError),
}

impl OrchestratorError {
    /// Error message with a remediation hint where one exists.
    pub fn user_friendly(&self) -> String {
        match self {
            Self::EngineUnavailable(detail) => {
                RuntimeError::EngineUnavailable(detail.clone()).user_friendly()
            }
            _ => self.to_string(),
        }
    }

    /// Partial output carried by a bounded exec failure.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            Self::Timeout { output, .. } | Self::OutputLimit { output, .. } => Some(output),
            _ => None,
        }
    }
}

impl From<RuntimeError> for OrchestratorError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(target) => Self::NotFound(target),
            RuntimeError::EngineUnavailable(message) => Self::EngineUnavailable(message),
            RuntimeError::Timeout(operation) => Self::Timeout {
                operation,
                output: String::new(),
            },
            RuntimeError::Invalid(message) => Self::InvalidInput(message),
            RuntimeError::Conflict(message) => Self::Conflict(message),
            other @ (RuntimeError::AlreadyInState { .. } | RuntimeError::Engine { .. }) => {
                Self::Runtime(other)
            }
        }
    }
}

impl From<TemplateError> for OrchestratorError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::NotFound(id) => Self::NotFound(format!("template '{id}'")),
            TemplateError::InvalidCatalog(message) => Self::InvalidInput(message),
        }
    }
}
