//! Standalone image registry daemon for the deployment pipeline.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "registryd", version, about = "Content-addressed image registry")]
struct Args {
    /// Address to bind
    #[arg(long = "bind", default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(short = 'p', long = "port", default_value_t = 5000)]
    port: u16,

    /// Storage directory for blobs, manifests and tags
    #[arg(long = "data-dir", default_value = "./registry-data")]
    data_dir: PathBuf,

    /// Static bearer token; when set, all /v2/ content requests require it
    #[arg(long = "token", env = "REGISTRY_TOKEN")]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default to info level if RUST_LOG not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    tracing::info!("[Registry] Data directory: {}", args.data_dir.display());
    if args.token.is_some() {
        tracing::info!("[Registry] Bearer authentication enabled");
    }

    let (addr, handle) =
        registry::start_server(args.data_dir, &args.bind, args.port, args.token).await?;
    tracing::info!("[Registry] API: http://{}/v2/", addr);
    tracing::info!("[Registry] Press Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("[Registry] Received Ctrl+C, shutting down");
        }
        _ = handle => {
            tracing::error!("[Registry] Server task exited unexpectedly");
        }
    }
    Ok(())
}
