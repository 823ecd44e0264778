//! threadchat - a minimal threaded LLM chatbot
//!
//! Serves a browser chat UI, sends each conversation to a hosted model, and
//! keeps every thread in a local SQLite checkpoint store so it can be resumed.

mod api;
mod chat_name;
mod config;
mod db;
mod graph;
mod llm;
mod session;
mod threads;

use api::{create_router, AppState};
use config::Config;
use db::Database;
use graph::{ChatGraph, DatabaseStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Optional .env next to the binary's working directory
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threadchat=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    if let Ok(path) = dotenv {
        tracing::info!(path = %path.display(), "Loaded environment file");
    }

    let config = Config::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    if config.llm.api_key.is_none() {
        tracing::warn!(
            provider = config.llm.provider.display_name(),
            env = ?config.llm.provider.api_key_env_vars(),
            "No API key configured; replies will fail until one is set"
        );
    }
    let llm = llm::create_service(&config.llm)?;
    tracing::info!(
        provider = config.llm.provider.display_name(),
        model = %llm.model_id(),
        "Model client initialized"
    );

    let store = Arc::new(DatabaseStore::new(db.clone()));
    let graph = Arc::new(ChatGraph::compile(store, llm));
    let state = AppState::new(graph);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("threadchat listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped, closing database");
    drop(db);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
