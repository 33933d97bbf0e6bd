//! The session-scoped mutation state machine that collects required fields
//! across turns, with pagination, value-type coercion, confirmation, and
//! post-error recovery.

pub mod fsm;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOperation {
    Insert,
    Update,
}

impl MutationOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOperation::Insert => "insert",
            MutationOperation::Update => "update",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Awaiting {
    FieldSelection,
    FieldValue,
    Confirmation,
}

/// The per-session persisted form-filling FSM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationState {
    pub workflow_id: String,
    pub state: String,
    pub operation: MutationOperation,
    pub table: String,
    pub required_fields: Vec<String>,
    pub collected_fields: BTreeMap<String, String>,
    pub pending_field: String,
    pub field_descriptions: BTreeMap<String, String>,
    pub awaiting: Awaiting,
    pub page: usize,
    pub page_size: usize,
}

impl MutationState {
    pub fn new(operation: MutationOperation, table: String, required_fields: Vec<String>) -> Self {
        let pending_field = required_fields.first().cloned().unwrap_or_default();
        Self {
            workflow_id: "mutation_menu".to_string(),
            state: format!("collect_{}_{}", operation.as_str(), table),
            operation,
            table,
            required_fields,
            collected_fields: BTreeMap::new(),
            pending_field,
            field_descriptions: BTreeMap::new(),
            awaiting: Awaiting::FieldSelection,
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Fields from `required_fields` not yet present (non-empty) in
    /// `collected_fields`, in required order.
    pub fn remaining_fields(&self) -> Vec<String> {
        self.required_fields
            .iter()
            .filter(|f| !self.collected_fields.contains_key(f.as_str()))
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_fields().is_empty()
    }

    /// The page of remaining fields currently shown in the field-selection
    /// menu, clamped so `page` always lands inside range.
    pub fn page_fields(&self) -> Vec<String> {
        let remaining = self.remaining_fields();
        if remaining.is_empty() {
            return Vec::new();
        }
        let page_size = self.page_size.max(1);
        let max_page = remaining.len().saturating_sub(1) / page_size;
        let page = self.page.min(max_page);
        let start = page * page_size;
        remaining.into_iter().skip(start).take(page_size).collect()
    }

    pub fn max_page(&self) -> usize {
        let remaining = self.remaining_fields().len();
        if remaining == 0 {
            return 0;
        }
        remaining.saturating_sub(1) / self.page_size.max(1)
    }
}

/// Heuristic input kind per field name, used to choose value coercion and
/// suggested options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Boolean,
    Date,
    Numeric,
    Text,
}

pub fn field_kind(field_name: &str) -> FieldKind {
    let lower = field_name.to_lowercase();
    if matches!(lower.as_str(), "is_active" | "active" | "enabled") {
        return FieldKind::Boolean;
    }
    if lower.contains("date") {
        return FieldKind::Date;
    }
    static NUMERIC_RE: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"(?i)^id$|_id$|count|qty|quantity|amount|price|occurrence|number|ref_no")
            .unwrap()
    });
    if NUMERIC_RE.is_match(&lower) {
        return FieldKind::Numeric;
    }
    FieldKind::Text
}

/// Suggested `label -> value` options for a field, per the heuristics in
/// §4.6. Returns `None` when the field has no canned suggestion set.
pub fn suggested_options(field_name: &str) -> Option<Vec<(&'static str, &'static str)>> {
    let lower = field_name.to_lowercase();
    match lower.as_str() {
        "occurrence" => Some(vec![
            ("Daily", "1"),
            ("Weekly", "2"),
            ("Monthly", "3"),
            ("Quarterly", "4"),
        ]),
        "is_active" | "active" | "enabled" => Some(vec![("Yes", "1"), ("No", "0")]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_kind_detects_occurrence_as_numeric() {
        assert_eq!(field_kind("occurrence"), FieldKind::Numeric);
    }

    #[test]
    fn field_kind_detects_booleans() {
        assert_eq!(field_kind("is_active"), FieldKind::Boolean);
        assert_eq!(field_kind("enabled"), FieldKind::Boolean);
    }

    #[test]
    fn field_kind_detects_dates() {
        assert_eq!(field_kind("scheduled_date"), FieldKind::Date);
    }

    #[test]
    fn field_kind_detects_ids_and_counters() {
        assert_eq!(field_kind("id"), FieldKind::Numeric);
        assert_eq!(field_kind("company_id"), FieldKind::Numeric);
        assert_eq!(field_kind("qty"), FieldKind::Numeric);
    }

    #[test]
    fn field_kind_defaults_to_text() {
        assert_eq!(field_kind("description"), FieldKind::Text);
    }

    #[test]
    fn page_fields_clamps_to_max_page() {
        let mut state = MutationState::new(
            MutationOperation::Insert,
            "scheduler_details".into(),
            vec!["a".into(), "b".into(), "c".into()],
        );
        state.page_size = 2;
        state.page = 99;
        assert_eq!(state.page_fields(), vec!["c".to_string()]);
    }
}
