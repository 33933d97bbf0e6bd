//! Active only for `insert`/`update` intents: resolves the target table
//! using the scheduler/task disambiguation rules ahead of the generic
//! manifest alias resolver used for `select`.

use crate::agent::graph::GraphContext;
use crate::agent::intent::Operation;
use crate::agent::mutation_resolver::MutationResolver;
use crate::agent::state::AgentState;

pub async fn run(ctx: &GraphContext, state: &mut AgentState) {
    let query = state.last_user_message();

    let Some(intent) = state.intent.as_mut() else {
        return;
    };

    if !matches!(intent.operation, Operation::Insert | Operation::Update) {
        return;
    }

    let resolver = MutationResolver::new(&ctx.catalog);
    let resolved = resolver.resolve_table(&query, &intent.table);
    if !resolved.is_empty() {
        intent.table = resolved;
    }
}
