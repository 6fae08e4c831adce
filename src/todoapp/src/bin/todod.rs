//! The Todo application server: validate configuration, open the store,
//! serve HTTP. Connectivity failure at startup is fatal with a
//! descriptive message; there is no retry.

use clap::Parser;
use std::sync::Arc;

use todoapp::http::{serve, AppState};
use todoapp::{AppConfig, FileStore, Templates};

#[derive(Parser, Debug)]
#[command(name = "todod", version, about = "Todo List web application")]
struct Args {
    /// Address to bind
    #[arg(long = "bind", default_value = "0.0.0.0")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default to info level if RUST_LOG not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("[TodoApp] Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let store = match FileStore::open(&config.database_path).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("[TodoApp] Cannot open store: {}", e);
            std::process::exit(1);
        }
    };

    let state = AppState {
        store: Arc::new(store),
        templates: Arc::new(Templates::new()?),
    };
    let (_addr, handle) = serve(state, &args.bind, config.port).await?;

    tracing::info!("[TodoApp] Press Ctrl+C to stop.");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("[TodoApp] Received Ctrl+C, shutting down");
        }
        _ = handle => {
            tracing::error!("[TodoApp] Server task exited unexpectedly");
        }
    }
    Ok(())
}
