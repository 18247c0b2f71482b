use crate::{Result, TemplateError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml_ng as serde_yaml;
use std::collections::BTreeMap;
use tracing::debug;

/// Immutable workspace blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub icon: String,
    pub category: String,
    #[serde(default)]
    pub features: Vec<String>,
    pub image: String,
    /// Default environment as `KEY=VALUE` entries.
    #[serde(default)]
    pub env: Vec<String>,
    /// Default published ports, container port to host port.
    #[serde(default)]
    pub ports: BTreeMap<u16, u16>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    templates: Vec<Template>,
}

/// Read-only catalog of templates, grouped by category.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    /// Templates ordered by category (first appearance), then declaration order.
    templates: Vec<Template>,
    index: IndexMap<String, usize>,
}

impl TemplateRegistry {
    /// Build the registry from the catalog compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(crate::embedded::catalog_source())
    }

    /// Parse and validate a catalog document.
    pub fn from_yaml(source: &str) -> Result<Self> {
        let catalog: CatalogFile = serde_yaml::from_str(source)?;
        Self::from_templates(catalog.templates)
    }

    pub fn from_templates(templates: Vec<Template>) -> Result<Self> {
        let mut groups: IndexMap<String, Vec<Template>> = IndexMap::new();
        for template in templates {
            validate_template(&template)?;
            groups
                .entry(template.category.clone())
                .or_default()
                .push(template);
        }

        let templates: Vec<Template> = groups.into_values().flatten().collect();
        let mut index = IndexMap::with_capacity(templates.len());
        for (position, template) in templates.iter().enumerate() {
            if index.insert(template.id.clone(), position).is_some() {
                return Err(TemplateError::InvalidCatalog(format!(
                    "duplicate template id '{}'",
                    template.id
                )));
            }
        }

        debug!(count = templates.len(), "Template registry loaded");
        Ok(Self { templates, index })
    }

    /// All templates, grouped by category.
    pub fn list(&self) -> &[Template] {
        &self.templates
    }

    pub fn get(&self, id: &str) -> Result<&Template> {
        self.index
            .get(id)
            .map(|&position| &self.templates[position])
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Category names in display order.
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = Vec::new();
        for template in &self.templates {
            if categories.last() != Some(&template.category.as_str()) {
                categories.push(&template.category);
            }
        }
        categories
    }

    pub fn by_category(&self) -> Vec<(&str, Vec<&Template>)> {
        let mut groups: Vec<(&str, Vec<&Template>)> = Vec::new();
        for template in &self.templates {
            match groups.last_mut() {
                Some((category, members)) if *category == template.category => {
                    members.push(template)
                }
                _ => groups.push((&template.category, vec![template])),
            }
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn validate_template(template: &Template) -> Result<()> {
    let invalid = |what: &str| {
        Err(TemplateError::InvalidCatalog(format!(
            "template '{}' has {}",
            template.id, what
        )))
    };

    if template.id.trim().is_empty() {
        return invalid("an empty id");
    }
    if template.name.trim().is_empty() {
        return invalid("an empty name");
    }
    if template.image.trim().is_empty() {
        return invalid("an empty image");
    }
    if let Some(entry) = template.env.iter().find(|entry| !entry.contains('=')) {
        return invalid(&format!("a malformed env entry '{entry}'"));
    }
    Ok(())
}
