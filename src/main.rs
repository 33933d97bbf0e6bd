//! Binary entry point: parses CLI overrides, builds the process singletons
//! via [`tag_chat_backend::bootstrap::build`], and serves the NDJSON chat API.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tag_chat_backend::bootstrap;
use tag_chat_backend::http;

/// TAG conversational SQL backend.
#[derive(Parser, Debug)]
#[command(name = "tag-chat-backend", version, about)]
struct Cli {
    /// Override the schema manifest path (defaults to `SCHEMA_MANIFEST_PATH`/`schema_manifest.json`).
    #[arg(long)]
    manifest: Option<String>,

    /// Override the HTTP bind host (defaults to `HTTP_HOST`/`0.0.0.0`).
    #[arg(long)]
    host: Option<String>,

    /// Override the HTTP bind port (defaults to `HTTP_PORT`/8000).
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let app = bootstrap::build(cli.manifest.as_deref()).await?;

    let host = cli.host.unwrap_or_else(|| app.settings.http_host.clone());
    let port = cli.port.unwrap_or(app.settings.http_port);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, http::router(app.state)).await?;

    Ok(())
}
