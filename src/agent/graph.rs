//! The workflow graph driver: an ordered node pipeline with conditional
//! edges over a shared, owned [`AgentState`] bag. Re-implemented as a plain
//! async function selecting the next node by label rather than a cyclic
//! graph library, per this crate's discriminated-variant state model.
//!
//! ```text
//! route → {CHAT → chat → END,
//!          SQL  → intent → mutation_understand → sql_build → {SKIP → END,
//!                                                             else → sql_validate → {error → respond,
//!                                                                                    ok    → sql_execute → respond}}}
//! respond → END
//! chat    → END
//! ```

use std::sync::Arc;

use crate::agent::intent::IntentService;
use crate::agent::nodes;
use crate::agent::router::{Route as RouterRoute, RouterService};
use crate::agent::state::{AgentState, Route};
use crate::llm::LlmClient;
use crate::manifest::ManifestCatalog;
use crate::schema::SchemaInspector;

/// Process-wide singletons the graph's nodes need: the manifest catalog,
/// the schema inspector (and its engine cache), an optional LLM client, and
/// the process default database URL (overridable per-request via
/// `metadata.db_connection_string`).
#[derive(Clone)]
pub struct GraphContext {
    pub catalog: Arc<ManifestCatalog>,
    pub schema: Arc<SchemaInspector>,
    pub llm: Option<Arc<LlmClient>>,
    pub default_database_url: String,
}

/// The compiled workflow graph. Stateless: all per-request state lives in
/// the [`AgentState`] bag passed to [`WorkflowGraph::invoke`].
#[derive(Clone)]
pub struct WorkflowGraph {
    ctx: GraphContext,
}

impl WorkflowGraph {
    pub fn new(ctx: GraphContext) -> Self {
        Self { ctx }
    }

    pub async fn invoke(&self, mut state: AgentState) -> AgentState {
        let query = state.last_user_message();

        let route = if state.mutation_context().is_some() {
            Route::Sql
        } else {
            let router = RouterService::new(self.ctx.llm.as_deref());
            match router.route(&query).await {
                RouterRoute::Sql => Route::Sql,
                RouterRoute::Chat => Route::Chat,
            }
        };
        state.route = Some(route);

        if route == Route::Chat {
            nodes::chat::run(&self.ctx, &mut state).await;
            return state;
        }

        let intent_service = IntentService::new(self.ctx.llm.as_deref());
        state.intent = Some(intent_service.analyze(&query).await);

        nodes::mutation_understand::run(&self.ctx, &mut state).await;
        nodes::sql_build::run(&self.ctx, &mut state).await;

        if state.is_sql_skipped() {
            return state;
        }

        nodes::sql_validate::run(&self.ctx, &mut state).await;

        if state.error.is_none() {
            nodes::sql_execute::run(&self.ctx, &mut state).await;
        }

        nodes::respond::run(&self.ctx, &mut state).await;
        state
    }
}
