//! Resolves the target table for `insert`/`update` intents. The base
//! manifest alias resolver cannot distinguish the scheduler subtypes
//! (`scheduler_details` vs. `scheduler_task_details`) from the word "task"
//! alone, so this adds a disambiguation pass ahead of it.

use std::sync::LazyLock;

use regex::Regex;

use crate::manifest::ManifestCatalog;

static SCHEDULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(schedule|scheduler|scheduled)\b").unwrap());
static TASK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\btask\b").unwrap());

pub struct MutationResolver<'a> {
    catalog: &'a ManifestCatalog,
}

impl<'a> MutationResolver<'a> {
    pub fn new(catalog: &'a ManifestCatalog) -> Self {
        Self { catalog }
    }

    /// If `intent_table` already names a known table, keep it. Else apply
    /// the scheduler/task disambiguation, then fall through to the
    /// manifest's general alias resolver.
    pub fn resolve_table(&self, query: &str, intent_table: &str) -> String {
        let q = query.trim().to_lowercase();
        let intent_table = intent_table.trim();

        if !intent_table.is_empty() && self.catalog.table_names().iter().any(|t| t == intent_table) {
            return intent_table.to_string();
        }

        let table_names = self.catalog.table_names();

        if SCHEDULE_RE.is_match(&q) && TASK_RE.is_match(&q) && table_names.iter().any(|t| t == "scheduler_task_details") {
            return "scheduler_task_details".to_string();
        }

        if SCHEDULE_RE.is_match(&q) && table_names.iter().any(|t| t == "scheduler_details") {
            return "scheduler_details".to_string();
        }

        self.catalog.resolve_table_from_query(&q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestFile;

    fn catalog() -> ManifestCatalog {
        let json = serde_json::json!({
            "tables": {
                "scheduler_details": {"important_columns": {"id": {}, "date": {}}},
                "scheduler_task_details": {"important_columns": {"id": {}, "date": {}}},
                "task_transaction": {"aliases": ["tasks"], "important_columns": {"id": {}}}
            }
        });
        ManifestCatalog::from_manifest(serde_json::from_value::<ManifestFile>(json).unwrap())
    }

    #[test]
    fn schedule_and_task_together_resolve_to_scheduler_task_details() {
        let catalog = catalog();
        let resolver = MutationResolver::new(&catalog);
        assert_eq!(
            resolver.resolve_table("create a scheduled task for pump inspection", ""),
            "scheduler_task_details"
        );
    }

    #[test]
    fn schedule_alone_resolves_to_scheduler_details() {
        let catalog = catalog();
        let resolver = MutationResolver::new(&catalog);
        assert_eq!(resolver.resolve_table("create schedule", ""), "scheduler_details");
    }

    #[test]
    fn falls_through_to_manifest_alias_resolver() {
        let catalog = catalog();
        let resolver = MutationResolver::new(&catalog);
        assert_eq!(resolver.resolve_table("add a new task", ""), "task_transaction");
    }

    #[test]
    fn known_intent_table_is_kept() {
        let catalog = catalog();
        let resolver = MutationResolver::new(&catalog);
        assert_eq!(
            resolver.resolve_table("anything", "scheduler_details"),
            "scheduler_details"
        );
    }
}
