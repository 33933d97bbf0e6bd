//! Builds the SQL statement for this turn, or sets `sql_query = "SKIP"` with
//! user-facing guidance when it cannot yet build one (unknown table, missing
//! required insert fields, update missing id, no updatable field).

use serde_json::Value;

use crate::agent::graph::GraphContext;
use crate::agent::intent::Operation;
use crate::agent::state::{AgentState, SKIP};
use crate::error::SqlError;
use crate::sql::SqlBuilder;
use crate::sql::builder::parse_kv_pairs;

pub async fn run(ctx: &GraphContext, state: &mut AgentState) {
    let query = state.last_user_message();
    let company_id = state.metadata.get("company_id").cloned();
    let builder = SqlBuilder::new(&ctx.catalog, ctx.llm.as_deref());

    if let Some(mutation_context) = state.mutation_context().cloned() {
        run_forced(&builder, state, &mutation_context, company_id.as_ref());
        return;
    }

    let Some(intent) = state.intent.clone() else {
        state.sql_query = Some(SKIP.to_string());
        state.push_assistant("Please mention a table/entity like task, schedule, asset, user, or facility.");
        return;
    };

    let table = builder.resolve_table(&query, &intent.table);

    if table.is_empty() {
        state.sql_query = Some(SKIP.to_string());
        state.push_assistant("Please mention a table/entity like task, schedule, asset, user, or facility.");
        return;
    }

    let mut fields = intent.fields.clone();
    for (k, v) in parse_kv_pairs(&query) {
        fields.insert(k, Value::String(v));
    }

    match intent.operation {
        Operation::Insert => {
            let required = ctx.catalog.required_create_fields(&table);
            let missing: Vec<&String> = required.iter().filter(|f| !fields.contains_key(*f)).collect();
            if !required.is_empty() && !missing.is_empty() {
                let next_field = missing[0];
                state.sql_query = Some(SKIP.to_string());
                state.push_assistant(format!(
                    "This {table} record is missing required fields. Let's do this step by step — \
                     please provide `{next_field}`."
                ));
                state.workflow_payload = Some(
                    serde_json::to_value(builder.mutation_form_payload(&table, "insert", &required))
                        .unwrap_or(Value::Null),
                );
                return;
            }

            match builder.build_insert(&table, &fields, company_id.as_ref()) {
                Ok(sql) => state.sql_query = Some(sql),
                Err(err) => {
                    state.sql_query = Some(SKIP.to_string());
                    state.push_assistant(insert_error_message(&err));
                }
            }
        }
        Operation::Update => match builder.build_update(&table, &fields, company_id.as_ref()) {
            Ok(sql) => state.sql_query = Some(sql),
            Err(err) => {
                state.sql_query = Some(SKIP.to_string());
                state.push_assistant(format!(
                    "{} Use e.g. id=123, status=Completed",
                    update_error_message(&err)
                ));
                let required = vec!["id".to_string(), "field=value".to_string()];
                state.workflow_payload = Some(
                    serde_json::to_value(builder.mutation_form_payload(&table, "update", &required))
                        .unwrap_or(Value::Null),
                );
            }
        },
        Operation::Select => {
            let (sql, usage) = builder.build_select(&query, &table, company_id.as_ref()).await;
            state.sql_query = Some(sql);
            if usage.is_some() {
                state.token_usage = usage;
            }
        }
    }
}

/// Builds deterministically from an explicit `mutation_context` (set by the
/// orchestrator after the mutation FSM's confirmation step), bypassing
/// free-text parsing entirely.
fn run_forced(
    builder: &SqlBuilder<'_>,
    state: &mut AgentState,
    mutation_context: &Value,
    company_id: Option<&Value>,
) {
    let operation = mutation_context
        .get("operation")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_lowercase();
    let table = mutation_context
        .get("table")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let fields = mutation_context
        .get("fields")
        .and_then(|v| v.as_object())
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();

    if table.is_empty() {
        state.sql_query = Some(SKIP.to_string());
        state.push_assistant("Please mention a table/entity like task, schedule, asset, user, or facility.");
        return;
    }

    match operation.as_str() {
        "insert" => match builder.build_insert(&table, &fields, company_id) {
            Ok(sql) => state.sql_query = Some(sql),
            Err(err) => {
                state.sql_query = Some(SKIP.to_string());
                state.push_assistant(insert_error_message(&err));
            }
        },
        "update" => match builder.build_update(&table, &fields, company_id) {
            Ok(sql) => state.sql_query = Some(sql),
            Err(err) => {
                state.sql_query = Some(SKIP.to_string());
                state.push_assistant(update_error_message(&err));
            }
        },
        _ => {
            state.sql_query = Some(SKIP.to_string());
            state.push_assistant("Please mention a table/entity like task, schedule, asset, user, or facility.");
        }
    }
}

fn insert_error_message(err: &SqlError) -> String {
    match err {
        SqlError::NoValidFields => "No valid fields found for insert.".to_string(),
        other => other.to_string(),
    }
}

fn update_error_message(err: &SqlError) -> String {
    match err {
        SqlError::MissingId => "Update requires id=<record_id>.".to_string(),
        SqlError::NoValidFields => "Update requires at least one field to change.".to_string(),
        other => other.to_string(),
    }
}
