//! Composes the final user-facing message from state: a safe-failure
//! message on error, a rows-affected summary for INSERT/UPDATE, or a count
//! and short preview for SELECT.

use crate::agent::graph::GraphContext;
use crate::agent::state::AgentState;

pub async fn run(_ctx: &GraphContext, state: &mut AgentState) {
    if let Some(error) = state.error.clone() {
        state.push_assistant(format!("Request failed safely: {error}"));
        return;
    }

    let sql = state.sql_query.clone().unwrap_or_default().trim().to_uppercase();
    let count = state.row_count.unwrap_or(0);

    let message = if sql.starts_with("INSERT") {
        format!("Insert successful. Rows affected: {count}.")
    } else if sql.starts_with("UPDATE") {
        format!("Update successful. Rows affected: {count}.")
    } else if count == 0 {
        "No records found.".to_string()
    } else {
        let preview: Vec<_> = state.rows_preview.iter().rev().take(3).rev().collect();
        format!(
            "Found {count} record(s). Preview: {}",
            serde_json::to_string(&preview).unwrap_or_default()
        )
    };

    state.push_assistant(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::graph::GraphContext;
    use crate::manifest::ManifestCatalog;
    use crate::schema::SchemaInspector;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn ctx() -> GraphContext {
        GraphContext {
            catalog: Arc::new(ManifestCatalog::from_manifest(Default::default())),
            schema: Arc::new(SchemaInspector::new()),
            llm: None,
            default_database_url: String::new(),
        }
    }

    fn row(id: i64) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::from([("id".to_string(), serde_json::Value::from(id))])
    }

    #[tokio::test]
    async fn select_preview_keeps_the_last_three_rows_not_the_first() {
        let mut state = AgentState {
            sql_query: Some("SELECT * FROM task_transaction LIMIT 100;".to_string()),
            row_count: Some(5),
            rows_preview: (1..=5).map(row).collect(),
            ..Default::default()
        };
        run(&ctx(), &mut state).await;
        let message = state.last_assistant_message();
        assert!(message.contains("Found 5 record(s)"));
        assert!(!message.contains("\"id\":1}"), "tail preview should drop the earliest rows");
        assert!(message.contains("\"id\":3}"));
        assert!(message.contains("\"id\":5}"));
    }
}
