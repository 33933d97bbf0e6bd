//! Deterministic INSERT/UPDATE construction with identifier whitelisting
//! and value quoting; LLM-assisted SELECT generation with a deterministic
//! fallback.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::SqlError;
use crate::llm::{self, LlmClient, TokenUsage};
use crate::manifest::ManifestCatalog;

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

static KV_EQUALS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([A-Za-z_][A-Za-z0-9_]*)\s*=\s*([^,;]+)").unwrap());
static KV_COLON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([A-Za-z_][A-Za-z0-9_]*)\s*:\s*([^,;]+)").unwrap());
static KV_IS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([A-Za-z_][A-Za-z0-9_]*)\s+is\s+([^,;]+)").unwrap());

/// A structured UI descriptor for a mutation still in form-collection,
/// used only when the orchestrator has not yet built a richer menu.
#[derive(Debug, Clone, Serialize)]
pub struct MutationFormPayload {
    pub workflow_id: String,
    pub state: String,
    pub completed: bool,
    pub collected_data: MutationFormCollectedData,
    pub ui: MutationFormUi,
}

#[derive(Debug, Clone, Serialize)]
pub struct MutationFormCollectedData {
    pub operation: String,
    pub table: String,
    pub required_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MutationFormUi {
    #[serde(rename = "type")]
    pub kind: String,
    pub state: String,
    pub title: String,
    pub description: String,
    pub fields: Vec<MutationFormField>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MutationFormField {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Returns `name` unchanged if it is a safe SQL identifier, else an empty
/// string.
pub fn safe_identifier(name: &str) -> &str {
    if IDENT_RE.is_match(name) { name } else { "" }
}

/// Renders a value for inline embedding into a literal SQL statement.
/// Numerics pass through as-is; `None` emits `NULL`; strings are trimmed of
/// outer quotes, have embedded single quotes doubled, then are wrapped in
/// single quotes.
pub fn safe_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => {
            let text = match other {
                Value::String(s) => s.as_str(),
                _ => return quote(&other.to_string()),
            };
            quote(text)
        }
    }
}

fn quote(text: &str) -> String {
    let trimmed = text.trim().trim_matches(|c| c == '\'' || c == '"');
    format!("'{}'", trimmed.replace('\'', "''"))
}

/// Parses `k = v`, `k: v`, and `k is v` alternatives out of free text,
/// case-insensitive, values terminated by comma/semicolon and trimmed of
/// wrapping quotes. Later alternatives can overwrite earlier matches for
/// the same key, mirroring the original's sequential-pattern accumulation.
pub fn parse_kv_pairs(text: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if text.is_empty() {
        return out;
    }
    for re in [&*KV_EQUALS_RE, &*KV_COLON_RE, &*KV_IS_RE] {
        for caps in re.captures_iter(text) {
            let key = caps[1].trim().to_string();
            let value = caps[2].trim().trim_matches(|c| c == '\'' || c == '"').to_string();
            out.insert(key, value);
        }
    }
    out
}

pub struct SqlBuilder<'a> {
    catalog: &'a ManifestCatalog,
    llm: Option<&'a LlmClient>,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(catalog: &'a ManifestCatalog, llm: Option<&'a LlmClient>) -> Self {
        Self { catalog, llm }
    }

    pub fn catalog(&self) -> &ManifestCatalog {
        self.catalog
    }

    /// Resolves a table name: an intent-carried table that exists in the
    /// manifest wins, else falls back to the manifest alias resolver.
    pub fn resolve_table(&self, query: &str, intent_table: &str) -> String {
        let candidate = intent_table.trim();
        if !candidate.is_empty() && self.catalog.table_names().iter().any(|t| t == candidate) {
            return candidate.to_string();
        }
        self.catalog.resolve_table_from_query(query)
    }

    /// `INSERT INTO <table> (cols) VALUES (vals);` built from whitelisted
    /// fields. Drops fields whose identifier fails the safety check, and
    /// fields not in the table's important-columns set (when non-empty).
    /// Injects `company_id` when the column exists, none was supplied, and
    /// a tenant id is in scope.
    pub fn build_insert(
        &self,
        table: &str,
        fields: &BTreeMap<String, Value>,
        company_id: Option<&Value>,
    ) -> Result<String, SqlError> {
        let allowed = self.catalog.important_columns(table);
        let mut normalized: BTreeMap<String, Value> = BTreeMap::new();

        for (key, value) in fields {
            let ident = safe_identifier(key);
            if ident.is_empty() {
                continue;
            }
            if !allowed.is_empty() && !allowed.contains(ident) {
                continue;
            }
            normalized.insert(ident.to_string(), value.clone());
        }

        if let Some(company_id) = company_id {
            if allowed.contains("company_id") && !normalized.contains_key("company_id") {
                normalized.insert("company_id".to_string(), company_id.clone());
            }
        }

        if normalized.is_empty() {
            return Err(SqlError::NoValidFields);
        }

        let cols = normalized.keys().cloned().collect::<Vec<_>>().join(", ");
        let vals = normalized
            .values()
            .map(safe_value)
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("INSERT INTO {table} ({cols}) VALUES ({vals});"))
    }

    /// `UPDATE <table> SET ... WHERE id=<val>[ AND company_id=<val>];`.
    /// Requires `id`; forbids `id` and `company_id` from the SET list.
    pub fn build_update(
        &self,
        table: &str,
        fields: &BTreeMap<String, Value>,
        company_id: Option<&Value>,
    ) -> Result<String, SqlError> {
        let allowed = self.catalog.important_columns(table);
        let record_id = fields.get("id").ok_or(SqlError::MissingId)?;

        let mut updates: BTreeMap<String, Value> = BTreeMap::new();
        for (key, value) in fields {
            let ident = safe_identifier(key);
            if ident.is_empty() || ident == "id" || ident == "company_id" {
                continue;
            }
            if !allowed.is_empty() && !allowed.contains(ident) {
                continue;
            }
            updates.insert(ident.to_string(), value.clone());
        }

        if updates.is_empty() {
            return Err(SqlError::NoValidFields);
        }

        let set_clause = updates
            .iter()
            .map(|(k, v)| format!("{k}={}", safe_value(v)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut where_clause = format!("id={}", safe_value(record_id));
        if let Some(company_id) = company_id {
            if allowed.contains("company_id") {
                where_clause.push_str(&format!(" AND company_id={}", safe_value(company_id)));
            }
        }

        Ok(format!("UPDATE {table} SET {set_clause} WHERE {where_clause};"))
    }

    /// Composes a prompt naming the table, its top-12 important columns, a
    /// mandatory `LIMIT 100`, and an optional tenant clause; invokes the LLM
    /// through the retry wrapper and extracts the first `{...}` object's
    /// `sql` field. Falls back to a deterministic `SELECT *` on any failure.
    pub async fn build_select(
        &self,
        query: &str,
        table: &str,
        company_id: Option<&Value>,
    ) -> (String, Option<TokenUsage>) {
        let important = self.catalog.important_columns(table);
        let mut cols: Vec<String> = important.iter().cloned().collect();
        cols.sort();
        cols.truncate(12);
        if cols.is_empty() {
            cols.push("*".to_string());
        }

        let tenant_clause = company_id
            .filter(|_| important.contains("company_id"))
            .map(|v| format!("WHERE company_id = {}", safe_value(v)));

        let fallback_sql = match &tenant_clause {
            Some(tenant) => format!("SELECT * FROM {table} {tenant} LIMIT 100;"),
            None => format!("SELECT * FROM {table} LIMIT 100;"),
        };

        let Some(llm) = self.llm else {
            return (fallback_sql, None);
        };

        let prompt = format!(
            "Return only JSON: {{\"sql\":\"...\"}}\n\
             Generate one SELECT query only.\n\
             Use table: {table}\n\
             Columns: {}\n\
             Must include LIMIT 100.\n\
             Respect this if applicable: {}\n\
             User query: {query}",
            cols.join(", "),
            tenant_clause.as_deref().unwrap_or("no tenant clause"),
        );

        match llm::complete_with_retry(
            llm,
            &prompt,
            2,
            0.3,
            |content| content.contains('{'),
            "v2_select",
        )
        .await
        {
            Ok((content, usage)) => {
                let sql = llm::extract_json_object(&content)
                    .and_then(|v| v.get("sql").and_then(|s| s.as_str()).map(str::to_string))
                    .filter(|s| !s.trim().is_empty())
                    .filter(|s| s.to_uppercase().contains("LIMIT 100"));
                match sql {
                    Some(sql) => (sql, Some(usage)),
                    None => (fallback_sql, Some(usage)),
                }
            }
            Err(_) => (fallback_sql, None),
        }
    }

    /// A structured UI descriptor used only when the orchestrator has not
    /// yet built a richer mutation-state-backed menu.
    pub fn mutation_form_payload(
        &self,
        table: &str,
        operation: &str,
        required_fields: &[String],
    ) -> MutationFormPayload {
        let state = format!("collect_{operation}_{table}");
        MutationFormPayload {
            workflow_id: "mutation_menu".to_string(),
            state: state.clone(),
            completed: false,
            collected_data: MutationFormCollectedData {
                operation: operation.to_string(),
                table: table.to_string(),
                required_fields: required_fields.to_vec(),
            },
            ui: MutationFormUi {
                kind: "form".to_string(),
                state,
                title: format!("{} {table}", capitalize(operation)),
                description: "Provide values as key=value pairs separated by commas.".to_string(),
                fields: required_fields
                    .iter()
                    .map(|f| MutationFormField {
                        id: f.clone(),
                        label: f.clone(),
                        kind: "text".to_string(),
                    })
                    .collect(),
            },
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestCatalog, ManifestFile};

    fn catalog() -> ManifestCatalog {
        let json = serde_json::json!({
            "tables": {
                "task_transaction": {
                    "important_columns": {
                        "id": {}, "description": {}, "company_id": {}
                    }
                }
            }
        });
        ManifestCatalog::from_manifest(serde_json::from_value::<ManifestFile>(json).unwrap())
    }

    #[test]
    fn safe_identifier_rejects_non_identifiers() {
        assert_eq!(safe_identifier("valid_name"), "valid_name");
        assert_eq!(safe_identifier("1bad"), "");
        assert_eq!(safe_identifier("bad; drop table x"), "");
    }

    #[test]
    fn safe_value_escapes_quotes() {
        assert_eq!(safe_value(&Value::String("O'Brien".into())), "'O''Brien'");
        assert_eq!(safe_value(&Value::Null), "NULL");
        assert_eq!(safe_value(&Value::from(42)), "42");
    }

    #[test]
    fn parse_kv_pairs_handles_all_three_alternatives() {
        let parsed = parse_kv_pairs("date = 2026-02-14, occurrence: 2, status is Open");
        assert_eq!(parsed.get("date").unwrap(), "2026-02-14");
        assert_eq!(parsed.get("occurrence").unwrap(), "2");
        assert_eq!(parsed.get("status").unwrap(), "Open");
    }

    #[test]
    fn build_insert_filters_unknown_fields_and_injects_company_id() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, None);
        let mut fields = BTreeMap::new();
        fields.insert("description".to_string(), Value::String("fix pump".into()));
        fields.insert("not_a_column".to_string(), Value::String("x".into()));
        let sql = builder
            .build_insert("task_transaction", &fields, Some(&Value::from(7)))
            .unwrap();
        assert!(sql.starts_with("INSERT INTO task_transaction ("));
        assert!(sql.ends_with(");"));
        assert!(sql.contains("company_id"));
        assert!(!sql.contains("not_a_column"));
    }

    #[test]
    fn build_insert_fails_with_no_valid_fields() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, None);
        let mut fields = BTreeMap::new();
        fields.insert("nonexistent".to_string(), Value::String("x".into()));
        assert!(matches!(
            builder.build_insert("task_transaction", &fields, None),
            Err(SqlError::NoValidFields)
        ));
    }

    #[test]
    fn build_update_requires_id() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, None);
        let mut fields = BTreeMap::new();
        fields.insert("description".to_string(), Value::String("x".into()));
        assert!(matches!(
            builder.build_update("task_transaction", &fields, None),
            Err(SqlError::MissingId)
        ));
    }

    #[test]
    fn build_update_never_emits_id_or_company_id_in_set_clause() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, None);
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), Value::from(5));
        fields.insert("company_id".to_string(), Value::from(9));
        fields.insert("description".to_string(), Value::String("x".into()));
        let sql = builder
            .build_update("task_transaction", &fields, Some(&Value::from(9)))
            .unwrap();
        assert!(sql.contains("WHERE id=5"));
        assert!(sql.contains("AND company_id=9"));
        let set_part = sql.split("SET ").nth(1).unwrap().split(" WHERE").next().unwrap();
        assert!(!set_part.contains("id=5"));
        assert!(!set_part.contains("company_id=9"));
    }

    #[tokio::test]
    async fn build_select_fallback_always_includes_limit_100() {
        let catalog = catalog();
        let builder = SqlBuilder::new(&catalog, None);
        let (sql, usage) = builder.build_select("show tasks", "task_transaction", None).await;
        assert!(sql.contains("LIMIT 100"));
        assert!(usage.is_none());
    }
}
