//! Container descriptors exchanged with runtime adapters
//!
//! [`ContainerSpec`] describes what to create; [`ContainerSummary`] is what the
//! engine reports back when listing. Neither is cached anywhere.

use crate::error::{Result, RuntimeError};
use crate::labels;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything needed to create a workspace container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Workspace name; the container name is derived from it.
    pub workspace_name: String,
    /// Template id or `"custom"`.
    pub workspace_type: String,
    pub image: String,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Container port to host port.
    pub ports: BTreeMap<u16, u16>,
    /// Extra labels, merged under the ownership labels.
    pub labels: BTreeMap<String, String>,
}

impl ContainerSpec {
    pub fn container_name(&self) -> String {
        labels::container_name(&self.workspace_name)
    }

    /// Full label set: caller labels plus ownership, type and name labels.
    pub fn all_labels(&self) -> BTreeMap<String, String> {
        let mut all = self.labels.clone();
        all.extend(labels::ownership_labels(
            &self.workspace_name,
            &self.workspace_type,
        ));
        all
    }

    /// Reject specs the engine would choke on, before any engine call.
    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(RuntimeError::Invalid("image reference is empty".to_string()));
        }
        validate_workspace_name(&self.workspace_name)?;
        if let Some(entry) = self.env.iter().find(|entry| !entry.contains('=')) {
            return Err(RuntimeError::Invalid(format!(
                "env entry '{entry}' is not KEY=VALUE"
            )));
        }
        if self.ports.keys().chain(self.ports.values()).any(|port| *port == 0) {
            return Err(RuntimeError::Invalid("port 0 cannot be published".to_string()));
        }
        Ok(())
    }
}

/// Workspace names become container names, so they follow the engine's rules:
/// `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
pub fn validate_workspace_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(RuntimeError::Invalid("workspace name is empty".to_string()));
    };
    if !first.is_ascii_alphanumeric() {
        return Err(RuntimeError::Invalid(format!(
            "workspace name '{name}' must start with a letter or digit"
        )));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))) {
        return Err(RuntimeError::Invalid(format!(
            "workspace name '{name}' contains invalid character '{bad}'"
        )));
    }
    if name.len() > 63 {
        return Err(RuntimeError::Invalid(format!(
            "workspace name '{name}' is longer than 63 characters"
        )));
    }
    Ok(())
}

/// Engine-reported container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }

    /// Whether the container's process is up (paused containers count).
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Restarting | Self::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        }
    }
}

/// One published (or merely exposed) port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
    pub protocol: String,
}

impl PortMapping {
    /// `ip:port` on the host, if the port is published.
    pub fn host_binding(&self) -> Option<String> {
        let port = self.host_port?;
        let ip = self
            .host_ip
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .unwrap_or("0.0.0.0");
        Some(format!("{ip}:{port}"))
    }
}

/// Runtime descriptor returned by label-filtered listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub ports: Vec<PortMapping>,
    pub labels: BTreeMap<String, String>,
    /// Creation time, seconds since the epoch.
    pub created: Option<i64>,
}

impl ContainerSummary {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn is_managed(&self) -> bool {
        self.label(labels::OWNER_LABEL) == Some(labels::OWNER_VALUE)
    }

    /// Published ports keyed by container port. The engine reports one entry
    /// per host address family; the first published one wins.
    pub fn published_ports(&self) -> BTreeMap<u16, String> {
        let mut published = BTreeMap::new();
        for mapping in &self.ports {
            if let Some(binding) = mapping.host_binding() {
                published.entry(mapping.container_port).or_insert(binding);
            }
        }
        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            workspace_name: "w1".to_string(),
            workspace_type: "minimal-dev".to_string(),
            image: "debian:bookworm-slim".to_string(),
            env: vec!["A=1".to_string()],
            ports: BTreeMap::from([(8080, 18080)]),
            labels: BTreeMap::from([(labels::WORKSPACE_ID_LABEL.to_string(), "id-1".to_string())]),
        }
    }

    #[test]
    fn test_valid_spec() {
        assert!(spec().validate().is_ok());
        assert_eq!(spec().container_name(), "berth-w1");
    }

    #[test]
    fn test_empty_image_is_invalid() {
        let mut spec = spec();
        spec.image = String::new();
        assert!(matches!(spec.validate(), Err(RuntimeError::Invalid(msg)) if msg.contains("image")));
    }

    #[test]
    fn test_workspace_name_rules() {
        assert!(validate_workspace_name("my-ws_1.dev").is_ok());
        assert!(validate_workspace_name("").is_err());
        assert!(validate_workspace_name("-leading").is_err());
        assert!(validate_workspace_name("has space").is_err());
        assert!(validate_workspace_name("semi;colon").is_err());
        assert!(validate_workspace_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_malformed_env_and_zero_port() {
        let mut bad_env = spec();
        bad_env.env.push("NOVALUE".to_string());
        assert!(bad_env.validate().is_err());

        let mut bad_port = spec();
        bad_port.ports.insert(0, 80);
        assert!(bad_port.validate().is_err());
    }

    #[test]
    fn test_ownership_labels_cannot_be_overridden() {
        let mut spec = spec();
        spec.labels
            .insert(labels::OWNER_LABEL.to_string(), "false".to_string());
        let all = spec.all_labels();
        assert_eq!(all.get(labels::OWNER_LABEL).map(String::as_str), Some("true"));
        assert_eq!(all.get(labels::WORKSPACE_NAME_LABEL).map(String::as_str), Some("w1"));
        assert_eq!(all.get(labels::WORKSPACE_ID_LABEL).map(String::as_str), Some("id-1"));
    }

    #[test]
    fn test_state_parsing() {
        assert_eq!(ContainerState::parse("running"), ContainerState::Running);
        assert_eq!(ContainerState::parse("Exited"), ContainerState::Exited);
        assert_eq!(ContainerState::parse("weird"), ContainerState::Unknown);
        assert!(ContainerState::Paused.is_running());
        assert!(!ContainerState::Created.is_running());
    }

    #[test]
    fn test_published_ports_dedupes_address_families() {
        let summary = ContainerSummary {
            id: "c1".to_string(),
            name: "berth-w1".to_string(),
            image: "img".to_string(),
            state: ContainerState::Running,
            ports: vec![
                PortMapping {
                    container_port: 80,
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(8080),
                    protocol: "tcp".to_string(),
                },
                PortMapping {
                    container_port: 80,
                    host_ip: Some("::".to_string()),
                    host_port: Some(8080),
                    protocol: "tcp".to_string(),
                },
                PortMapping {
                    container_port: 9000,
                    host_ip: None,
                    host_port: None,
                    protocol: "tcp".to_string(),
                },
            ],
            labels: BTreeMap::new(),
            created: None,
        };

        let published = summary.published_ports();
        assert_eq!(published.len(), 1);
        assert_eq!(published.get(&80).map(String::as_str), Some("0.0.0.0:8080"));
        assert!(!summary.is_managed());
    }
}
