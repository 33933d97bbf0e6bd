//! The per-request state bag flowing through the workflow graph. A tagged
//! record with explicit optional fields, replacing the original's untyped
//! dict-based `AgentState`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::intent::Intent;
use crate::llm::TokenUsage;

/// A sentinel value of `sql_query` telling downstream nodes to short-circuit
/// without executing anything.
pub const SKIP: &str = "SKIP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Sql,
    Chat,
}

/// The graph-scoped state bag, owned by the orchestrator for the duration
/// of one request; the graph writes only to its own fields within it.
#[derive(Debug, Clone, Default)]
pub struct AgentState {
    pub messages: Vec<Turn>,
    pub metadata: BTreeMap<String, Value>,
    pub route: Option<Route>,
    pub intent: Option<Intent>,
    /// Literal SQL, or the [`SKIP`] sentinel.
    pub sql_query: Option<String>,
    pub sql_result: Option<String>,
    pub row_count: Option<i64>,
    pub rows_preview: Vec<BTreeMap<String, Value>>,
    pub error: Option<String>,
    pub workflow_payload: Option<Value>,
    pub token_usage: Option<TokenUsage>,
}

impl AgentState {
    pub fn last_user_message(&self) -> String {
        self.messages
            .last()
            .map(|t| t.content.clone())
            .unwrap_or_default()
    }

    pub fn last_assistant_message(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|t| matches!(t.role, Role::Assistant))
            .map(|t| t.content.clone())
            .unwrap_or_default()
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Turn {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    pub fn mutation_context(&self) -> Option<&Value> {
        self.metadata.get("mutation_context")
    }

    pub fn is_sql_skipped(&self) -> bool {
        self.sql_query.as_deref() == Some(SKIP)
    }
}
