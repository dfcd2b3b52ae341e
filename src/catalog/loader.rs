//! Catalog documents on disk and on the wire
//!
//! A catalog document is a list of module definitions, encoded as JSON
//! (`{"modules": [...]}` or a bare array) or TOML (`[[modules]]` tables).

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::ModuleDefinition;
use crate::error::CatalogError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub modules: Vec<ModuleDefinition>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonDocument {
    Wrapped(CatalogDocument),
    Bare(Vec<ModuleDefinition>),
}

impl CatalogDocument {
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        match serde_json::from_str::<JsonDocument>(text) {
            Ok(JsonDocument::Wrapped(doc)) => Ok(doc),
            Ok(JsonDocument::Bare(modules)) => Ok(Self { modules }),
            Err(e) => Err(CatalogError::Parse(e.to_string())),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, CatalogError> {
        toml::from_str(text).map_err(|e| CatalogError::Parse(e.to_string()))
    }

    /// Read a catalog file, choosing the format by extension
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Parse(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&text),
            _ => Self::from_json(&text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_json_wrapped_and_bare() {
        let wrapped = r#"{"modules": [{"id": "M1", "title": "Intro"}]}"#;
        assert_eq!(CatalogDocument::from_json(wrapped).unwrap().modules.len(), 1);

        let bare = r#"[{"id": "M1", "title": "Intro"}, {"id": "M2", "title": "Next", "prerequisites": ["M1"]}]"#;
        let doc = CatalogDocument::from_json(bare).unwrap();
        assert_eq!(doc.modules.len(), 2);
        assert_eq!(doc.modules[1].prerequisites, vec!["M1".into()]);
    }

    #[test]
    fn test_json_metadata_fields() {
        let text = r#"{"modules": [{
            "id": "ds",
            "title": "Data Structures Fundamentals",
            "course": "Computer Science",
            "difficulty": "Intermediate",
            "duration": "3 hours",
            "topics": ["Arrays", "Trees"],
            "resources": {"videos": 15, "notes": 20, "quizzes": 5}
        }]}"#;
        let doc = CatalogDocument::from_json(text).unwrap();
        let m = &doc.modules[0];
        assert_eq!(m.course, "Computer Science");
        assert_eq!(m.resources.quizzes, 5);
        assert_eq!(m.duration.as_deref(), Some("3 hours"));
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        let err = CatalogDocument::from_json("{not json").unwrap_err();
        assert!(matches!(err, CatalogError::Parse(_)));
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[[modules]]
id = "M1"
title = "Intro"

[[modules]]
id = "M2"
title = "Next"
prerequisites = ["M1"]
"#
        )
        .unwrap();

        let doc = CatalogDocument::load(file.path()).unwrap();
        assert_eq!(doc.modules.len(), 2);
        assert_eq!(doc.modules[1].id.as_str(), "M2");
    }
}
