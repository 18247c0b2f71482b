//! Container labels and the naming scheme that bind workspaces to containers.
//!
//! Berth keeps no index of its own: a workspace is reconstructed entirely from
//! the labels on its container, and discovery filters on [`OWNER_LABEL`].

use std::collections::BTreeMap;

/// Ownership marker carried by every container berth creates.
pub const OWNER_LABEL: &str = "berth.managed";
pub const OWNER_VALUE: &str = "true";

pub const WORKSPACE_ID_LABEL: &str = "berth.workspace.id";
pub const WORKSPACE_NAME_LABEL: &str = "berth.workspace.name";
/// Template id, or [`CUSTOM_WORKSPACE_TYPE`].
pub const WORKSPACE_TYPE_LABEL: &str = "berth.workspace.type";
/// Comma-separated feature list.
pub const WORKSPACE_FEATURES_LABEL: &str = "berth.workspace.features";

pub const CUSTOM_WORKSPACE_TYPE: &str = "custom";

const CONTAINER_PREFIX: &str = "berth-";

/// Engine-side container name for a workspace name.
pub fn container_name(workspace_name: &str) -> String {
    format!("{CONTAINER_PREFIX}{workspace_name}")
}

/// Labels that mark a container as owned by berth.
pub fn ownership_labels(
    workspace_name: &str,
    workspace_type: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OWNER_LABEL.to_string(), OWNER_VALUE.to_string()),
        (WORKSPACE_NAME_LABEL.to_string(), workspace_name.to_string()),
        (WORKSPACE_TYPE_LABEL.to_string(), workspace_type.to_string()),
    ])
}

pub fn encode_features(features: &[String]) -> String {
    features.join(",")
}

pub fn decode_features(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|feature| !feature.is_empty())
        .map(str::to_string)
        .collect()
}

/// A conjunction of label constraints, `key` or `key=value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    terms: Vec<(String, Option<String>)>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector matching every berth-managed container.
    pub fn managed() -> Self {
        Self::new().with_value(OWNER_LABEL, OWNER_VALUE)
    }

    /// Require the label to be present, whatever its value.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.terms.push((key.into(), None));
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.push((key.into(), Some(value.into())));
        self
    }

    /// Render as engine filter expressions (`label=key` / `label=key=value`).
    pub fn to_filters(&self) -> Vec<String> {
        self.terms
            .iter()
            .map(|(key, value)| match value {
                Some(value) => format!("{key}={value}"),
                None => key.clone(),
            })
            .collect()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms.iter().all(|(key, value)| match value {
            Some(expected) => labels.get(key) == Some(expected),
            None => labels.contains_key(key),
        })
    }
}
