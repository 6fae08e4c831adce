//! Host-side daemon: `shipd provision` sets the host up, `shipd
//! supervise` runs the polling supervisor and the health monitor.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use deploy::compose::{parse_env_file, ComposeSpec, COMPOSE_FILE_NAME};
use deploy::provision::{HostSpec, LogProgressReporter, ProvisionContext, ProvisionPlan};
use deploy::{HealthMonitor, ImageStore, LocalProcessRuntime, Supervisor, SupervisorConfig};
use registry::{ImageReference, RegistryClient};

#[derive(Parser, Debug)]
#[command(name = "shipd", version, about = "Provision a host and supervise the application")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the idempotent host-setup plan
    Provision {
        /// Host address, recorded in the report
        #[arg(long = "host", default_value = "localhost")]
        host: String,

        /// Allow privileged system changes (user creation)
        #[arg(long = "elevate")]
        elevate: bool,

        /// Application directory for secrets, compose file and data
        #[arg(long = "app-dir")]
        app_dir: PathBuf,

        /// Directory for runtime state and the local image store; must not
        /// live inside the application directory
        #[arg(long = "state-dir", default_value = "/var/lib/shipd")]
        state_dir: PathBuf,

        /// Designated app user; verified, and created when --elevate is set
        #[arg(long = "app-user")]
        app_user: Option<String>,

        /// Compose file to install; when absent the standard two-service
        /// definition is generated from the flags below
        #[arg(long = "compose")]
        compose: Option<PathBuf>,

        /// Image reference with the moving tag
        #[arg(long = "image", default_value = "localhost:5000/todo/app:latest")]
        image: String,

        /// Port published on the host
        #[arg(long = "host-port", default_value_t = 3000)]
        host_port: u16,

        /// Port the workload listens on
        #[arg(long = "container-port", default_value_t = 3000)]
        container_port: u16,

        /// Environment variable holding the secret (the database URL)
        #[arg(long = "secret-env", default_value = "TODO_SECRET")]
        secret_env: String,

        /// File holding the secret; takes precedence over --secret-env
        #[arg(long = "secret-file")]
        secret_file: Option<PathBuf>,

        /// Registry endpoint; derived from the image reference when absent
        #[arg(long = "registry")]
        registry: Option<String>,

        /// Bearer token for the registry
        #[arg(long = "token", env = "REGISTRY_TOKEN")]
        token: Option<String>,
    },

    /// Run the polling supervisor and the health monitor
    Supervise {
        /// Application directory holding compose.yaml and .env
        #[arg(long = "app-dir")]
        app_dir: PathBuf,

        /// Directory for runtime state and the local image store; the same
        /// one `shipd provision` used
        #[arg(long = "state-dir", default_value = "/var/lib/shipd")]
        state_dir: PathBuf,

        /// Registry endpoint; derived from the image reference when absent
        #[arg(long = "registry")]
        registry: Option<String>,

        /// Bearer token for the registry
        #[arg(long = "token", env = "REGISTRY_TOKEN")]
        token: Option<String>,
    },
}

/// Registry base URL for an image reference: explicit flag first, then the
/// registry host embedded in the reference.
fn registry_url(flag: Option<String>, reference: &ImageReference) -> String {
    if let Some(url) = flag {
        return url;
    }
    match &reference.registry {
        Some(host) => format!("http://{}", host),
        None => "http://localhost:5000".to_string(),
    }
}

/// Open the image store and the process runtime under the state directory.
/// Nothing here touches the application directory.
fn open_state(
    state_dir: &Path,
) -> deploy::Result<(Arc<ImageStore>, Arc<dyn deploy::ContainerRuntime>)> {
    let images = Arc::new(ImageStore::new(state_dir.join("images"))?);
    let runtime: Arc<dyn deploy::ContainerRuntime> = Arc::new(LocalProcessRuntime::new(
        state_dir.join("runtime"),
        images.clone(),
    )?);
    Ok((images, runtime))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default to info level if RUST_LOG not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    match args.command {
        Command::Provision {
            host,
            elevate,
            app_dir,
            state_dir,
            app_user,
            compose,
            image,
            host_port,
            container_port,
            secret_env,
            secret_file,
            registry,
            token,
        } => {
            let compose = match compose {
                Some(path) => ComposeSpec::load(&path).await?,
                None => ComposeSpec::standard(&image, host_port, container_port),
            };

            let secret = match secret_file {
                Some(path) => std::fs::read_to_string(&path)
                    .map_err(|e| format!("cannot read secret file {}: {}", path.display(), e))?
                    .trim()
                    .to_string(),
                None => std::env::var(&secret_env)
                    .map_err(|_| format!("secret variable {} is not set", secret_env))?,
            };

            let reference = compose.image_reference()?;
            let client = RegistryClient::new(&registry_url(registry, &reference), token)?;
            // State stays outside app_dir so a fresh host still reports the
            // app-directory step as a change
            let (images, runtime) = open_state(&state_dir)?;

            let ctx = ProvisionContext {
                host: HostSpec {
                    address: host,
                    elevate,
                    app_dir,
                    app_user,
                },
                compose,
                secret,
                runtime,
                images,
                client,
            };

            let report = ProvisionPlan::standard()
                .run(&ctx, &LogProgressReporter)
                .await?;
            for step in &report.steps {
                tracing::info!("[shipd] {:<20} {:?}", step.name, step.status);
            }
            if report.converged() {
                tracing::info!("[shipd] Host already converged, nothing to do");
            }
            Ok(())
        }

        Command::Supervise {
            app_dir,
            state_dir,
            registry,
            token,
        } => {
            let compose = ComposeSpec::load(&app_dir.join(COMPOSE_FILE_NAME)).await?;
            let env_path = app_dir.join(&compose.app.env_file);
            let env_content = std::fs::read_to_string(&env_path).map_err(|e| {
                format!(
                    "cannot read env file {} (run `shipd provision` first): {}",
                    env_path.display(),
                    e
                )
            })?;
            let env = parse_env_file(&env_content)?;

            let reference = compose.image_reference()?;
            let client = RegistryClient::new(&registry_url(registry, &reference), token)?;
            let (images, runtime) = open_state(&state_dir)?;

            let config = SupervisorConfig::from_compose(compose.clone(), env)?;
            let stop_timeout = config.stop_timeout;
            let supervisor = Arc::new(Supervisor::new(
                config,
                client,
                runtime.clone(),
                images.clone(),
            ));
            let monitor = HealthMonitor::from_check(
                &compose.app.healthcheck,
                compose.app.host_port,
                runtime,
                compose.app.container_name.clone(),
                stop_timeout,
            )?;

            let shutdown = CancellationToken::new();
            let supervisor_task = {
                let supervisor = supervisor.clone();
                let token = shutdown.clone();
                tokio::spawn(async move { supervisor.run(token).await })
            };
            let monitor_task = {
                let token = shutdown.clone();
                tokio::spawn(async move { monitor.run(token).await })
            };

            tracing::info!("[shipd] Press Ctrl+C to stop.");
            tokio::signal::ctrl_c().await?;
            tracing::info!("[shipd] Received Ctrl+C, shutting down");
            shutdown.cancel();
            let _ = supervisor_task.await;
            let _ = monitor_task.await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Opening the state stores must not create the app directory; the
    // provisioning plan's app-directory step owns that and reports it.
    #[test]
    fn test_opening_state_leaves_a_fresh_app_dir_absent() {
        let base = tempfile::tempdir().unwrap();
        let state_dir = base.path().join("state");
        let app_dir = base.path().join("app");

        let (_images, _runtime) = open_state(&state_dir).unwrap();

        assert!(state_dir.join("images").is_dir());
        assert!(!app_dir.exists());
    }
}
