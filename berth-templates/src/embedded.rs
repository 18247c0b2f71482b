/// Raw YAML of the built-in template catalog.
pub const CATALOG_YAML: &str = include_str!("../templates/catalog.yaml");

/// Get the embedded catalog source
pub fn catalog_source() -> &'static str {
    CATALOG_YAML
}
