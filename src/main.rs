mod config;
mod gate;
mod oauth;
mod routes;
mod session;
mod state;
mod store;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StoreBackend;
use crate::store::{EphemeralStore, MemoryStore, RedisStore};

/// OAuth session gate: signs users in through Google or Line and guards
/// the API behind a signed session token.
#[derive(Parser, Debug)]
#[command(name = "oauth-session-gate", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Port to listen on (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    // CLI --port overrides config
    if let Some(port) = cli.port {
        cfg.server.port = port;
    }

    tracing::info!(
        carrier = ?cfg.credential.carrier,
        carrier_name = %cfg.credential.name,
        store = ?cfg.store.backend,
        session_ttl = cfg.server.session_ttl,
        "Configuration loaded successfully"
    );

    // The state handshake cannot work without the store: fail startup.
    let store: Arc<dyn EphemeralStore> = match cfg.store.backend {
        StoreBackend::Redis => {
            match RedisStore::connect(&cfg.store.url, Duration::from_secs(cfg.store.timeout)).await
            {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::error!("Failed to connect to the state store: {e}");
                    std::process::exit(1);
                }
            }
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory state store; it is not shared across instances");
            Arc::new(MemoryStore::new())
        }
    };

    let app_state = match state::AppState::from_config(&cfg, store) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Startup error: {e}");
            std::process::exit(1);
        }
    };

    let app = routes::router(app_state);

    let bind_addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    tracing::info!("Listening on {bind_addr}");
    tracing::info!("Public URL: {}", cfg.server.public_url);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {bind_addr}: {e}");
            std::process::exit(1);
        });

    axum::serve(listener, app).await.unwrap_or_else(|e| {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    });
}
