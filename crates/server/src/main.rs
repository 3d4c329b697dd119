//! Tether — session relay for generative-AI conversations.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use tether::agent::Agent;
use tether::api;
use tether::logging::init_logging;
use tether::persist::SqlitePersister;
use tether::ws::ws_handler;
use tether_adapter_claude::ClaudeAdapter;

#[derive(Parser)]
#[command(name = "tether", about = "Session relay for generative-AI conversations")]
struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 4000, env = "TETHER_PORT")]
    port: u16,

    /// Workspace directory holding the database and logs.
    #[arg(long, env = "TETHER_HOME")]
    workspace: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let workspace = cli.workspace.unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".tether")
    });
    let _logging = init_logging(&workspace)?;

    let persister = Arc::new(SqlitePersister::open(workspace.join("tether.db"))?);
    let adapter = Arc::new(ClaudeAdapter::new());
    let agent = Arc::new(Agent::new(adapter, persister));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(api::health))
        .route("/sessions", post(api::create_session).get(api::list_sessions))
        .route("/sessions/{id}", axum::routing::delete(api::delete_session))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(agent);

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    info!(
        component = "server",
        event = "server.listening",
        addr = %addr,
        "Listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
