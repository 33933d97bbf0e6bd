//! Request/response shapes for the HTTP surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::TokenUsage;

/// `session_id` is non-empty per spec invariant; enforced by the HTTP
/// handler before this reaches the orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_role: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum NdjsonRecord {
    #[serde(rename = "token")]
    Token { content: String },
    #[serde(rename = "result")]
    Result(Box<ResultRecord>),
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    pub session_id: String,
    pub message: String,
    pub status: Status,
    pub labels: Vec<String>,
    pub workflow: Option<Value>,
    pub sql: Option<SqlResultPayload>,
    pub token_usage: Option<TokenUsageWire>,
    pub provider_used: String,
    pub trace_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenUsageWire {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl From<TokenUsage> for TokenUsageWire {
    fn from(usage: TokenUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SqlResultPayload {
    pub ran: bool,
    pub cached: bool,
    pub query: String,
    pub row_count: Option<i64>,
    /// At most 20 rows.
    pub rows_preview: Vec<BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStartResponse {
    pub session_id: String,
    pub message: String,
}

/// The `x-user-context` header's decoded payload. `user_id`/`user_role`
/// populate the request; everything else merges into `metadata`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserContextHeader {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_role: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}
