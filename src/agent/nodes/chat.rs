//! Non-SQL conversational turn: a capabilities blurb, an out-of-domain
//! refusal, or an LLM completion kept on a short domain-scoped leash.

use std::sync::LazyLock;

use regex::Regex;

use crate::agent::graph::GraphContext;
use crate::agent::state::AgentState;

const DOMAIN_HINTS: &[&str] = &[
    "task",
    "tasks",
    "asset",
    "assets",
    "facility",
    "facilities",
    "user",
    "users",
    "company",
    "checklist",
    "scheduler",
    "sql",
    "database",
    "tag",
    "session",
    "query",
    "insert",
    "update",
    "select",
    "count",
];

static CAPABILITIES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(what can you do|how can you help|capabilities|help)\b").unwrap());

fn capabilities_message() -> &'static str {
    "I only support TAG application tasks. I can help you with:\n\
     1. Querying project data (tasks, assets, facilities, users, companies).\n\
     2. Counting/listing records from the database.\n\
     3. Creating or updating records with valid fields.\n\
     4. Explaining schema-aware errors and required input fields."
}

fn out_of_domain_message() -> &'static str {
    "I can only help with this TAG project and its database operations. \
     Ask about tasks, assets, facilities, users, schedules, or SQL-backed actions."
}

fn is_domain_query(query: &str) -> bool {
    let q = query.to_lowercase();
    DOMAIN_HINTS.iter().any(|hint| q.contains(hint))
}

pub async fn run(ctx: &GraphContext, state: &mut AgentState) {
    let query = state.last_user_message();
    let q = query.trim();

    if CAPABILITIES_RE.is_match(q) {
        state.push_assistant(capabilities_message());
        state.token_usage = None;
        return;
    }

    if !is_domain_query(q) {
        state.push_assistant(out_of_domain_message());
        state.token_usage = None;
        return;
    }

    let Some(llm) = ctx.llm.as_deref() else {
        state.push_assistant(out_of_domain_message());
        return;
    };

    let prompt = format!(
        "You are the TAG backend assistant. Keep responses strictly limited to this project's \
         application domain: tasks, assets, facilities, users, companies, schedules, and DB actions. \
         Do not offer generic assistant abilities outside the project.\n\
         User: {q}"
    );

    match llm.complete(&prompt).await {
        Ok((content, usage)) => {
            state.push_assistant(content);
            state.token_usage = Some(usage);
        }
        Err(_) => {
            state.push_assistant(out_of_domain_message());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_hints_cover_core_entities() {
        assert!(is_domain_query("show task count"));
        assert!(is_domain_query("list my Assets"));
        assert!(!is_domain_query("translate hello to french"));
    }

    #[test]
    fn capabilities_regex_matches_help_phrasing() {
        assert!(CAPABILITIES_RE.is_match("what can you do?"));
        assert!(CAPABILITIES_RE.is_match("help"));
        assert!(!CAPABILITIES_RE.is_match("show task count"));
    }
}
