use anyhow::{bail, Result};
use berth_templates::TemplateRegistry;
use serde_json::{json, Value};

/// `{templates: [...]}`, optionally restricted to one category.
pub fn handle_templates(registry: &TemplateRegistry, category: Option<&str>) -> Result<Value> {
    let templates: Vec<_> = match category {
        None => registry.list().iter().collect(),
        Some(category) => match registry
            .by_category()
            .into_iter()
            .find(|(name, _)| *name == category)
        {
            Some((_, templates)) => templates,
            None => bail!(
                "Unknown category '{}'. Available: {}",
                category,
                registry.categories().join(", ")
            ),
        },
    };
    Ok(json!({ "templates": templates }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_templates() {
        let registry = TemplateRegistry::builtin().unwrap();
        let value = handle_templates(&registry, None).unwrap();
        assert_eq!(value["templates"].as_array().unwrap().len(), registry.len());
        assert_eq!(value["templates"][0]["id"], "minimal-dev");
    }

    #[test]
    fn test_single_category() {
        let registry = TemplateRegistry::builtin().unwrap();
        let value = handle_templates(&registry, Some("database")).unwrap();
        let templates = value["templates"].as_array().unwrap();
        assert!(!templates.is_empty());
        assert!(templates.iter().all(|t| t["category"] == "database"));
    }

    #[test]
    fn test_unknown_category() {
        let registry = TemplateRegistry::builtin().unwrap();
        let err = handle_templates(&registry, Some("games")).unwrap_err();
        assert!(err.to_string().contains("Unknown category 'games'"));
    }
}
