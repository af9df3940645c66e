//! Mindline - conversation backend for a mental-health support chatbot
//!
//! Serves conversation sessions over HTTP: users chat with a hosted LLM,
//! turns are stored in SQLite, and conversation lists stream over SSE.

mod api;
mod auth;
mod config;
mod db;
mod llm;
mod runtime;
mod state_machine;
mod system_prompt;

use api::{create_router, AppState};
use auth::{HttpIdentityProvider, IdentityProvider, StaticIdentityProvider};
use config::{AppConfig, AuthConfig};
use db::Database;
use runtime::{DatabaseStorage, ServiceCompletionClient, SessionManager};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mindline=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path, "Opening database");
    let db = Database::open(&config.db_path)?;

    let service = llm::build_service(&config.llm)?;
    if service.is_none() {
        tracing::warn!("No completion provider configured. Set GEMINI_API_KEY or LLM_GATEWAY.");
    }

    let identity: Arc<dyn IdentityProvider> = match &config.auth {
        AuthConfig::Hosted { url, api_key } => {
            tracing::info!(url = %url, "Using hosted identity provider");
            Arc::new(HttpIdentityProvider::new(url, api_key.clone())?)
        }
        AuthConfig::DevTokens(list) => {
            let provider = StaticIdentityProvider::from_token_list(list);
            tracing::warn!(tokens = provider.token_count(), "Using static development tokens");
            Arc::new(provider)
        }
    };

    let sessions = Arc::new(SessionManager::new(
        DatabaseStorage::new(db),
        ServiceCompletionClient::new(service),
        config.session,
    ));
    tracing::info!(model = %sessions.model_id(), "Session manager ready");
    let state = AppState::new(sessions, identity);

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
    tracing::info!("Mindline server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
