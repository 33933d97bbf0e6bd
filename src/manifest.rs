//! Read-only index over the schema manifest file: table names, aliases,
//! important columns, required-on-create fields.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::warn;

const DEFAULT_EXCLUDED_REQUIRED_FIELDS: &[&str] =
    &["id", "created_at", "updated_at", "deleted_at", "is_active"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestFile {
    #[serde(default)]
    pub tables: HashMap<String, TableMeta>,
    #[serde(default)]
    pub few_shot_examples: Vec<serde_json::Value>,
    #[serde(default)]
    pub query_templates: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableMeta {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub important_columns: HashMap<String, ColumnMeta>,
    #[serde(default)]
    pub operations: Option<Operations>,
    #[serde(default)]
    pub joins: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColumnMeta {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operations {
    #[serde(default)]
    pub create: Option<CreateOp>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateOp {
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// Process-global, read-only catalog over the schema manifest.
#[derive(Debug, Clone)]
pub struct ManifestCatalog {
    manifest: ManifestFile,
}

impl ManifestCatalog {
    /// Load the manifest from disk. A missing or unparsable file degrades to
    /// an empty manifest (per spec: manifest absent/invalid is not fatal).
    pub fn load(path: &str) -> Self {
        let manifest = std::fs::read_to_string(path)
            .map_err(|e| {
                warn!(%path, error = %e, "schema manifest not found, starting with empty manifest");
                e
            })
            .ok()
            .and_then(|contents| {
                serde_json::from_str::<ManifestFile>(&contents)
                    .map_err(|e| {
                        warn!(%path, error = %e, "failed to parse schema manifest, starting with empty manifest");
                        e
                    })
                    .ok()
            })
            .unwrap_or_default();

        Self { manifest }
    }

    pub fn from_manifest(manifest: ManifestFile) -> Self {
        Self { manifest }
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.manifest.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn table_meta(&self, table: &str) -> Option<&TableMeta> {
        self.manifest.tables.get(table)
    }

    pub fn important_columns(&self, table: &str) -> HashSet<String> {
        self.table_meta(table)
            .map(|meta| meta.important_columns.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Alias construction: lowercased table name, underscore-to-space form,
    /// an implicit singular for `_details`-suffixed tables, an explicit
    /// scheduler synonym group, then custom manifest aliases. Duplicates
    /// removed, first occurrence preserved.
    pub fn aliases(&self, table: &str) -> Vec<String> {
        let lower = table.to_lowercase();
        let mut ordered: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let mut push = |ordered: &mut Vec<String>, seen: &mut HashSet<String>, alias: String| {
            let alias = alias.trim().to_string();
            if alias.is_empty() || seen.contains(&alias) {
                return;
            }
            seen.insert(alias.clone());
            ordered.push(alias);
        };

        push(&mut ordered, &mut seen, lower.clone());
        push(&mut ordered, &mut seen, lower.replace('_', " "));

        if let Some(stripped) = lower.strip_suffix("_details") {
            push(&mut ordered, &mut seen, stripped.to_string());
        }

        if lower.contains("scheduler") {
            for synonym in ["schedule", "scheduler", "scheduled"] {
                push(&mut ordered, &mut seen, synonym.to_string());
            }
        }

        if let Some(meta) = self.table_meta(table) {
            for custom in &meta.aliases {
                push(&mut ordered, &mut seen, custom.to_lowercase());
            }
        }

        ordered
    }

    /// Resolve a table from free text by iterating tables in lexicographic
    /// order and returning the first whose any alias is a substring of the
    /// lowercased query. Empty string on no match.
    pub fn resolve_table_from_query(&self, query: &str) -> String {
        let q = query.to_lowercase();
        if q.is_empty() {
            return String::new();
        }
        for table in self.table_names() {
            if self.aliases(&table).iter().any(|alias| q.contains(alias.as_str())) {
                return table;
            }
        }
        String::new()
    }

    /// Prefer explicit `operations.create.required_fields`; else derive from
    /// `important_columns` minus the default exclusion set.
    pub fn required_create_fields(&self, table: &str) -> Vec<String> {
        let Some(meta) = self.table_meta(table) else {
            return Vec::new();
        };

        if let Some(explicit) = meta
            .operations
            .as_ref()
            .and_then(|ops| ops.create.as_ref())
            .map(|create| &create.required_fields)
            .filter(|fields| !fields.is_empty())
        {
            return explicit
                .iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
        }

        let excluded: HashSet<&str> = DEFAULT_EXCLUDED_REQUIRED_FIELDS.iter().copied().collect();
        let mut fields: Vec<String> = meta
            .important_columns
            .keys()
            .filter(|col| !excluded.contains(col.as_str()))
            .cloned()
            .collect();
        fields.sort();
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with_scheduler_tables() -> ManifestCatalog {
        let json = serde_json::json!({
            "tables": {
                "scheduler_details": {
                    "important_columns": {
                        "id": {},
                        "date": {},
                        "occurrence": {},
                        "created_at": {}
                    }
                },
                "scheduler_task_details": {
                    "important_columns": {
                        "id": {},
                        "date": {},
                        "occurrence": {},
                        "task_name": {}
                    },
                    "operations": {
                        "create": {
                            "required_fields": ["date", "occurrence", "task_name"]
                        }
                    }
                },
                "task_transaction": {
                    "aliases": ["tasks"],
                    "important_columns": {
                        "id": {},
                        "description": {}
                    }
                }
            }
        });
        let manifest: ManifestFile = serde_json::from_value(json).unwrap();
        ManifestCatalog::from_manifest(manifest)
    }

    #[test]
    fn missing_file_yields_empty_catalog() {
        let catalog = ManifestCatalog::load("/nonexistent/path/schema_manifest.json");
        assert!(catalog.table_names().is_empty());
        assert_eq!(catalog.resolve_table_from_query("anything"), "");
    }

    #[test]
    fn aliases_include_underscore_space_and_scheduler_synonyms() {
        let catalog = catalog_with_scheduler_tables();
        let aliases = catalog.aliases("scheduler_details");
        assert!(aliases.contains(&"scheduler_details".to_string()));
        assert!(aliases.contains(&"scheduler details".to_string()));
        assert!(aliases.contains(&"scheduler".to_string()));
        assert!(aliases.contains(&"schedule".to_string()));
        assert!(aliases.contains(&"scheduled".to_string()));
    }

    #[test]
    fn aliases_strip_details_suffix() {
        let catalog = catalog_with_scheduler_tables();
        let aliases = catalog.aliases("scheduler_task_details");
        assert!(aliases.contains(&"scheduler_task".to_string()));
    }

    #[test]
    fn resolve_table_from_query_is_lexicographic_and_substring_based() {
        let catalog = catalog_with_scheduler_tables();
        assert_eq!(catalog.resolve_table_from_query("show my tasks"), "task_transaction");
    }

    #[test]
    fn resolve_table_returns_empty_on_no_match() {
        let catalog = catalog_with_scheduler_tables();
        assert_eq!(catalog.resolve_table_from_query("what is the weather"), "");
    }

    #[test]
    fn required_create_fields_prefers_explicit_list() {
        let catalog = catalog_with_scheduler_tables();
        let fields = catalog.required_create_fields("scheduler_task_details");
        assert_eq!(fields, vec!["date", "occurrence", "task_name"]);
    }

    #[test]
    fn required_create_fields_falls_back_to_important_columns_minus_exclusions() {
        let catalog = catalog_with_scheduler_tables();
        let fields = catalog.required_create_fields("scheduler_details");
        assert_eq!(fields, vec!["date", "occurrence"]);
    }
}
