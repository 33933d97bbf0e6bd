//! Executes the built SQL in a fresh connection. Errors propagate to the
//! orchestrator for recovery; there are no retries here.

use serde_json::Value;

use crate::agent::graph::GraphContext;
use crate::agent::state::AgentState;

pub async fn run(ctx: &GraphContext, state: &mut AgentState) {
    if state.error.is_some() {
        return;
    }

    let Some(sql) = state.sql_query.clone() else {
        return;
    };
    if sql.is_empty() || sql == crate::agent::state::SKIP {
        return;
    }

    let db_url = state
        .metadata
        .get("db_connection_string")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| ctx.default_database_url.clone());

    match ctx.schema.execute(&db_url, &sql).await {
        Ok(result) => {
            let rows: Vec<std::collections::BTreeMap<String, Value>> = result
                .rows_preview
                .into_iter()
                .map(|row| row.into_iter().collect())
                .collect();
            state.row_count = Some(result.row_count as i64);
            state.sql_result = Some(
                serde_json::to_string(&rows).unwrap_or_else(|_| "[]".to_string()),
            );
            state.rows_preview = rows;
            state.error = None;
        }
        Err(e) => {
            state.error = Some(e.to_string());
        }
    }
}
