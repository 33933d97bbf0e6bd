//! Static safety validation: parses the built SQL, fetches live column
//! metadata for any referenced tables, and rejects forbidden statements,
//! duplicate aliases, or unknown qualified columns.

use std::collections::{HashMap, HashSet};

use crate::agent::graph::GraphContext;
use crate::agent::state::AgentState;
use crate::sql::SqlValidator;

pub async fn run(ctx: &GraphContext, state: &mut AgentState) {
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

    let validator = SqlValidator::new();

    let tables = match validator.validate(&sql, None) {
        Ok(tables) => tables,
        Err(e) => {
            state.error = Some(format!("SQL failed safety validation: {e}"));
            return;
        }
    };

    let table_columns: Option<HashMap<String, HashSet<String>>> = if tables.is_empty() {
        None
    } else {
        Some(ctx.schema.get_table_columns(&db_url, &tables).await)
    };

    if validator.validate(&sql, table_columns.as_ref()).is_err() {
        state.error = Some("SQL failed safety validation.".to_string());
    }
}
