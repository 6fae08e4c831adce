//! One-shot CI runner: takes a push event from the command line, builds
//! the image and pushes it to the registry.

use clap::Parser;
use std::path::PathBuf;

use pipeline::{PipelineConfig, PipelineTrigger, PushEvent, Pusher, RunOutcome};
use registry::RegistryClient;

#[derive(Parser, Debug)]
#[command(name = "shipci", version, about = "Build and push the application image")]
struct Args {
    /// Source tree to build
    #[arg(long = "source-dir")]
    source_dir: PathBuf,

    /// Branch the push happened on
    #[arg(long = "branch", default_value = "main")]
    branch: String,

    /// Branch that triggers the pipeline
    #[arg(long = "designated-branch", default_value = "main")]
    designated_branch: String,

    /// Commit identifier for the run record
    #[arg(long = "commit", default_value = "workdir")]
    commit: String,

    /// Registry endpoint, e.g. http://localhost:5000
    #[arg(long = "registry", default_value = "http://localhost:5000")]
    registry: String,

    /// Bearer token for the registry
    #[arg(long = "token", env = "REGISTRY_TOKEN")]
    token: Option<String>,

    /// Repository name for the image
    #[arg(long = "image", default_value = "todo/app")]
    image: String,

    /// Moving tag to update
    #[arg(long = "tag", default_value = "latest")]
    tag: String,

    /// Base image recorded in the image config
    #[arg(long = "base-image", default_value = "scratch")]
    base_image: String,

    /// Port the workload listens on
    #[arg(long = "port", default_value_t = 3000)]
    port: u16,

    /// Launch command (repeat for each argv element)
    #[arg(long = "cmd", default_values_t = vec!["todod".to_string()])]
    cmd: Vec<String>,

    /// Environment variable names the workload reads
    #[arg(long = "env-key", default_values_t = vec!["TODO_DATABASE_URL".to_string(), "TODO_PORT".to_string()])]
    env_keys: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default to info level if RUST_LOG not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    let client = RegistryClient::new(&args.registry, args.token)?;
    let config = PipelineConfig {
        branch: args.designated_branch,
        moving_tag: args.tag,
        image_name: args.image,
        base_image: args.base_image,
        exposed_port: args.port,
        cmd: args.cmd,
        env_keys: args.env_keys,
    };
    let trigger = PipelineTrigger::new(config, Pusher::new(client))?;

    let record = trigger
        .handle_push(PushEvent {
            branch: args.branch,
            commit: args.commit,
            source_dir: args.source_dir,
        })
        .await;

    match &record.outcome {
        RunOutcome::Succeeded {
            manifest_digest,
            build_tag,
        } => {
            tracing::info!(
                "[shipci] Run {} succeeded: digest {}, build tag {}",
                record.id,
                manifest_digest,
                build_tag
            );
            Ok(())
        }
        RunOutcome::Skipped { reason } => {
            tracing::info!("[shipci] Run {} skipped: {}", record.id, reason);
            Ok(())
        }
        RunOutcome::Failed { stage, error } => {
            tracing::error!(
                "[shipci] Run {} failed at {:?}: {}",
                record.id,
                stage,
                error
            );
            std::process::exit(1);
        }
    }
}
