//! Error types for the chat backend.

use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("SQL error: {0}")]
    Sql(#[from] SqlError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Pool build error: {0}")]
    PoolBuild(#[from] deadpool_postgres::CreatePoolError),

    #[error("Query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("Unknown table: {0}")]
    UnknownTable(String),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("request timed out")]
    Timeout,

    #[error("response rejected by validator")]
    ValidatorRejected,
}

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("failed to parse SQL: {0}")]
    Parse(String),

    #[error("statement kind {0} is forbidden")]
    ForbiddenStatement(String),

    #[error("duplicate table alias: {0}")]
    DuplicateAlias(String),

    #[error("column {column} is not present on table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("table {0} is not in the allowed list")]
    TableNotAllowed(String),

    #[error("no valid fields to build statement")]
    NoValidFields,

    #[error("missing id for update")]
    MissingId,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("workflow graph failed: {0}")]
    Graph(String),

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}
