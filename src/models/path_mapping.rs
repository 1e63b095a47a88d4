use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operating system a path-mapping rule's source path is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceOs {
    Windows,
    Linux,
    #[serde(alias = "mac", alias = "mac os", alias = "darwin")]
    Macos,
}

/// A directory-substitution rule supplied by the controller.
///
/// Rules are ordered and consumed read-only; the first rule whose source
/// prefix matches wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMappingRule {
    pub source_os: SourceOs,
    pub source_path: String,
    pub destination_path: String,
}

impl PathMappingRule {
    /// Apply this rule to a path, returning the mapped path when the rule's
    /// source prefix matches at a path-component boundary.
    pub fn apply(&self, path: &str) -> Option<String> {
        let source = self.source_path.trim_end_matches(['/', '\\']);
        let candidate = if self.source_os == SourceOs::Windows {
            // Windows sources compare case-insensitively and accept either
            // separator.
            let normalized = path.replace('\\', "/");
            let source_norm = source.replace('\\', "/");
            if !normalized
                .to_ascii_lowercase()
                .starts_with(&source_norm.to_ascii_lowercase())
            {
                return None;
            }
            normalized[source_norm.len()..].to_string()
        } else {
            path.strip_prefix(source)?.to_string()
        };

        if candidate.is_empty() || candidate.starts_with('/') || candidate.starts_with('\\') {
            Some(format!(
                "{}{}",
                self.destination_path.trim_end_matches(['/', '\\']),
                candidate.replace('\\', "/"),
            ))
        } else {
            None
        }
    }
}

/// Apply an ordered rule list to a path, first match wins.
///
/// Returns the input unchanged when no rule matches.
pub fn map_path(rules: &[PathMappingRule], path: &str) -> String {
    rules
        .iter()
        .find_map(|rule| rule.apply(path))
        .unwrap_or_else(|| path.to_string())
}

#[derive(Deserialize)]
struct RuleDocument {
    path_mapping_rules: Vec<PathMappingRule>,
}

/// Parse a path-mapping document.
///
/// Accepts either the wrapped form `{"path_mapping_rules": [...]}` or a bare
/// rule list.
pub fn parse_rules(value: &Value) -> Result<Vec<PathMappingRule>, serde_json::Error> {
    if value.is_array() {
        serde_json::from_value(value.clone())
    } else {
        serde_json::from_value::<RuleDocument>(value.clone()).map(|doc| doc.path_mapping_rules)
    }
}
