//! Process startup: builds the singletons every request needs and hands
//! back a ready-to-serve [`http::AppState`]. Grounded on the lifespan hook
//! that used to wire up the cache and the compiled workflow graph once at
//! process start, before the HTTP listener opened.

use std::sync::Arc;

use tracing::info;

use crate::agent::graph::{GraphContext, WorkflowGraph};
use crate::config::Settings;
use crate::http::AppState;
use crate::llm::LlmClient;
use crate::manifest::ManifestCatalog;
use crate::orchestrator::ChatOrchestrator;
use crate::schema::SchemaInspector;
use crate::session::{ResponseCache, SessionStore};

/// The fully wired application, ready to be handed to an HTTP listener.
pub struct Application {
    pub settings: Arc<Settings>,
    pub state: AppState,
}

/// Builds every process-wide singleton: settings, the table manifest, the
/// schema inspector (and its per-connection-string engine cache), an
/// optional LLM client (only constructed when an API key is configured),
/// the Redis-backed session store and response cache, and the compiled
/// workflow graph. Called once at startup, before the HTTP listener binds.
pub async fn build(manifest_path_override: Option<&str>) -> Result<Application, crate::error::Error> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    info!(app_env = %settings.app_env, "loaded settings");

    let manifest_path = manifest_path_override.unwrap_or(&settings.schema_manifest_path);
    let catalog = Arc::new(ManifestCatalog::load(manifest_path));
    info!(tables = catalog.table_names().len(), path = %manifest_path, "loaded schema manifest");

    let schema = Arc::new(SchemaInspector::new());

    let llm = settings.llm_api_key.clone().map(|key| {
        Arc::new(
            LlmClient::new(
                settings.llm_base_url.clone(),
                Some(key),
                settings.llm_model.clone(),
                settings.llm_timeout,
            )
            .expect("llm base url from settings is always a valid http(s) url"),
        )
    });
    if llm.is_none() {
        info!("no LLM_API_KEY/GROQ_API_KEY configured; LLM-backed nodes will use deterministic fallbacks only");
    }

    let sessions = Arc::new(SessionStore::connect(&settings.redis_url).await);
    let cache = Arc::new(ResponseCache::from_store(&sessions));

    let graph_ctx = GraphContext {
        catalog: catalog.clone(),
        schema,
        llm,
        default_database_url: settings.database_url.clone(),
    };
    let graph = Arc::new(WorkflowGraph::new(graph_ctx));

    let orchestrator = Arc::new(ChatOrchestrator::new(graph, catalog, sessions, cache));

    let state = AppState {
        orchestrator,
        app_env: settings.app_env.clone(),
    };

    Ok(Application {
        settings: Arc::new(settings),
        state,
    })
}
