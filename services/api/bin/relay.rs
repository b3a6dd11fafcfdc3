//! Main Entrypoint for the VoiceRAG Relay
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the system prompt and the tool catalog.
//! 3. Choosing upstream credentials (API key or refreshed bearer token).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use voicerag_api::{
    config::{Config, load_system_prompt},
    credentials::{AzureCliTokenProvider, BearerTokenCache, UpstreamAuth},
    router::create_router,
    state::AppState,
    tools::load_tools,
    ws::upstream::UpstreamConnector,
};
use voicerag_core::ToolRegistry;

#[derive(Parser)]
#[command(name = "relay", version)]
#[command(about = "Realtime voice relay with server-side tool execution")]
struct Args {
    /// Extra dotenv file loaded before the environment is read
    #[arg(long)]
    env_file: Option<PathBuf>,
}

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if let Some(path) = &args.env_file {
        dotenvy::from_path(path)
            .with_context(|| format!("Failed to load env file {}", path.display()))?;
    }

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing relay state...");

    // --- 2. Prompt and Tools ---
    let instructions = load_system_prompt(&config.prompts_path, config.custom_language.as_deref())?;
    let policy = Arc::new(config.session_policy(instructions));

    let registry = match &config.tools_path {
        Some(path) => load_tools(path, &reqwest::Client::new())?,
        None => {
            warn!("TOOLS_PATH is not set. Sessions will run without tools.");
            ToolRegistry::new()
        }
    };
    info!(tools = registry.len(), "Tool catalog ready.");

    // --- 3. Upstream Credentials ---
    let (auth, refresh_task) = match &config.api_key {
        Some(key) => {
            info!("Using API key authentication for the upstream service.");
            (UpstreamAuth::ApiKey(key.clone()), None)
        }
        None => {
            info!("No API key configured. Using Azure CLI bearer tokens.");
            let provider = Arc::new(AzureCliTokenProvider::new(config.tenant_id.clone()));
            let cache = BearerTokenCache::warm_up(provider).await?;
            let task = cache.spawn_refresh(config.token_refresh);
            (UpstreamAuth::Bearer(cache), Some(task))
        }
    };

    let upstream = UpstreamConnector::new(
        &config.endpoint,
        config.model_family,
        &config.deployment,
        &config.api_version,
        auth,
    )?;

    let app_state = Arc::new(AppState {
        registry: Arc::new(registry),
        policy,
        upstream: Arc::new(upstream),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state.clone(), config.static_dir.as_deref()).layer(cors);

    // --- 5. Start Server ---
    info!(
        family = ?config.model_family,
        upstream = %app_state.upstream.url(),
        bind_address = %config.bind_address,
        "Relay configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = refresh_task {
        task.abort();
    }
    info!("Server has shut down.");
    Ok(())
}
