//! Workspace template catalog.
//!
//! Templates are blueprints (image, environment, published ports, feature list)
//! compiled into the binary. The registry is built once at startup and is
//! read-only afterwards; nothing here touches the network or the disk.

pub mod embedded;
pub mod registry;

pub use registry::{Template, TemplateRegistry};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TemplateError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Invalid template catalog: {0}")]
    InvalidCatalog(String),
}

impl From<serde_yaml_ng::Error> for TemplateError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        TemplateError::InvalidCatalog(err.to_string())
    }
}
