//! Loads the `--maskings-file` JSON document and adapts it to the
//! `docdump_core::interfaces::Maskings` contract.
//!
//! Masking/transformation logic is an explicit external collaborator
//! (spec.md §1 non-goals, §4.K): the core only calls through the
//! `Maskings` trait. This module is the thin, CLI-owned implementation of
//! that contract - it does not attempt to reproduce a full masking DSL,
//! only the per-collection structure/data toggle and a flat field-redaction
//! rule, which is enough to exercise every branch `dump_data` (spec.md
//! §4.K) takes.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use docdump_core::interfaces::Maskings;
use serde::Deserialize;
use serde_json::Value;

/// One collection's entry in the maskings file.
#[derive(Debug, Clone, Deserialize, Default)]
struct CollectionRule {
    #[serde(default)]
    name: String,
    /// `"exclude"` skips both structure and data; `"excludeData"` dumps the
    /// structure but skips documents; anything else (or omitted) dumps both.
    #[serde(rename = "type", default)]
    kind: String,
    /// Top-level field names to redact in every document.
    #[serde(rename = "maskFields", default)]
    mask_fields: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct MaskingsFile {
    #[serde(default)]
    collections: Vec<CollectionRule>,
}

/// Field-redaction maskings loaded from a JSON file (SPEC_FULL.md §6).
pub struct FileMaskings {
    rules: HashMap<String, CollectionRule>,
}

impl FileMaskings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading maskings file {}", path.display()))?;
        let parsed: MaskingsFile = serde_json::from_str(&text)
            .with_context(|| format!("parsing maskings file {}", path.display()))?;
        let rules = parsed
            .collections
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();
        Ok(Self { rules })
    }

    fn rule(&self, collection: &str) -> Option<&CollectionRule> {
        self.rules.get(collection)
    }
}

impl Maskings for FileMaskings {
    fn should_dump_structure(&self, collection: &str) -> bool {
        !matches!(self.rule(collection), Some(r) if r.kind == "exclude")
    }

    fn should_dump_data(&self, collection: &str) -> bool {
        !matches!(self.rule(collection), Some(r) if r.kind == "exclude" || r.kind == "excludeData")
    }

    fn mask(&self, collection: &str, doc_in: &Value) -> Value {
        let Some(rule) = self.rule(collection) else {
            return doc_in.clone();
        };
        if rule.mask_fields.is_empty() {
            return doc_in.clone();
        }
        let mut masked = doc_in.clone();
        if let Some(obj) = masked.as_object_mut() {
            for field in &rule.mask_fields {
                if obj.contains_key(field) {
                    obj.insert(field.clone(), Value::String("xxxx".to_string()));
                }
            }
        }
        masked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), contents).unwrap();
        file
    }

    #[test]
    fn excluded_collection_skips_structure_and_data() {
        let file = write_file(
            r#"{"collections": [{"name": "secrets", "type": "exclude"}]}"#,
        );
        let maskings = FileMaskings::load(file.path()).unwrap();
        assert!(!maskings.should_dump_structure("secrets"));
        assert!(!maskings.should_dump_data("secrets"));
    }

    #[test]
    fn exclude_data_keeps_structure() {
        let file = write_file(
            r#"{"collections": [{"name": "audit", "type": "excludeData"}]}"#,
        );
        let maskings = FileMaskings::load(file.path()).unwrap();
        assert!(maskings.should_dump_structure("audit"));
        assert!(!maskings.should_dump_data("audit"));
    }

    #[test]
    fn mask_redacts_listed_fields_only() {
        let file = write_file(
            r#"{"collections": [{"name": "users", "maskFields": ["email", "ssn"]}]}"#,
        );
        let maskings = FileMaskings::load(file.path()).unwrap();
        let doc = json!({"email": "a@b.com", "ssn": "123", "name": "alice"});
        let masked = maskings.mask("users", &doc);
        assert_eq!(masked["email"], json!("xxxx"));
        assert_eq!(masked["ssn"], json!("xxxx"));
        assert_eq!(masked["name"], json!("alice"));
    }

    #[test]
    fn unlisted_collection_is_untouched() {
        let file = write_file(r#"{"collections": []}"#);
        let maskings = FileMaskings::load(file.path()).unwrap();
        assert!(maskings.should_dump_structure("anything"));
        assert!(maskings.should_dump_data("anything"));
        let doc = json!({"a": 1});
        assert_eq!(maskings.mask("anything", &doc), doc);
    }
}
