//! Emits `{operation, table, filters, fields}` from free text. LLM-JSON
//! first; on failure or parse error, falls back to a verb-keyword regex for
//! `operation` alone.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{self, LlmClient};

static INSERT_VERBS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(insert|create|add|new)\b").unwrap());
static UPDATE_VERBS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(update|edit|modify|change|set)\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Select,
    Insert,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub operation: Operation,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Intent {
    fn fallback(query: &str) -> Self {
        let operation = if INSERT_VERBS_RE.is_match(query) {
            Operation::Insert
        } else if UPDATE_VERBS_RE.is_match(query) {
            Operation::Update
        } else {
            Operation::Select
        };
        Intent {
            operation,
            table: String::new(),
            filters: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }
}

pub struct IntentService<'a> {
    llm: Option<&'a LlmClient>,
}

impl<'a> IntentService<'a> {
    pub fn new(llm: Option<&'a LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn analyze(&self, query: &str) -> Intent {
        let Some(llm) = self.llm else {
            return Intent::fallback(query);
        };

        let prompt = format!(
            "Return ONLY JSON with keys:\n\
             operation: select|insert|update\n\
             table: db table name or empty string\n\
             filters: object\n\
             fields: object\n\n\
             User query: {query}"
        );

        let result = llm::complete_with_retry(
            llm,
            &prompt,
            2,
            0.3,
            |content| content.contains('{'),
            "v2_intent",
        )
        .await;

        match result {
            Ok((content, _usage)) => llm::extract_json_object(&content)
                .and_then(|v| serde_json::from_value::<Intent>(v).ok())
                .unwrap_or_else(|| Intent::fallback(query)),
            Err(_) => Intent::fallback(query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fallback_detects_insert_verbs() {
        let service = IntentService::new(None);
        let intent = service.analyze("create a new task").await;
        assert_eq!(intent.operation, Operation::Insert);
        assert_eq!(intent.table, "");
    }

    #[tokio::test]
    async fn fallback_detects_update_verbs() {
        let service = IntentService::new(None);
        let intent = service.analyze("update the status").await;
        assert_eq!(intent.operation, Operation::Update);
    }

    #[tokio::test]
    async fn fallback_defaults_to_select() {
        let service = IntentService::new(None);
        let intent = service.analyze("show all tasks").await;
        assert_eq!(intent.operation, Operation::Select);
    }
}
