//! The runtime supervisor: polls the registry for the watched moving tag
//! and replaces the application container when the tag's content changes.
//!
//! Each cycle resolves the tag to a digest with a cheap HEAD request and
//! compares it with the digest the running container is pinned to.
//! Unchanged content means no action; changed content means exactly one
//! replacement: pull, stop old, start new pinned to the new digest with
//! the same port and environment, optionally delete the old image. The
//! swap is not atomic; a brief unavailability window during stop/start is
//! accepted and bounded by the stop timeout.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use registry::{Digest, RegistryClient};

use crate::compose::ComposeSpec;
use crate::error::{DeployError, Result};
use crate::images::ImageStore;
use crate::runtime::{ContainerRuntime, ContainerState};

/// Default time allowed for the old container to exit during a swap.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// The compose definition: image reference with the watched tag,
    /// container name, ports, health check.
    pub compose: ComposeSpec,
    /// Environment for the application container (from the env file)
    pub env: BTreeMap<String, String>,
    pub poll_interval: Duration,
    /// Delete the old image after a replacement
    pub cleanup: bool,
    pub stop_timeout: Duration,
}

impl SupervisorConfig {
    /// Derive the supervisor configuration from a loaded compose spec.
    pub fn from_compose(compose: ComposeSpec, env: BTreeMap<String, String>) -> Result<Self> {
        compose
            .validate()
            .map_err(DeployError::Compose)?;
        let poll_interval = Duration::from_secs(compose.supervisor.poll_interval_secs);
        let cleanup = compose.supervisor.cleanup;
        Ok(Self {
            compose,
            env,
            poll_interval,
            cleanup,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        })
    }
}

/// What one poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleAction {
    /// Tag content matches the running container
    Unchanged,
    /// No container was running; one was started
    Started { digest: Digest },
    /// Tag content changed; the container was replaced
    Replaced {
        old: Digest,
        new: Digest,
        old_image_removed: bool,
    },
}

pub struct Supervisor {
    config: SupervisorConfig,
    client: RegistryClient,
    runtime: Arc<dyn ContainerRuntime>,
    images: Arc<ImageStore>,
    replacements: AtomicU64,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        client: RegistryClient,
        runtime: Arc<dyn ContainerRuntime>,
        images: Arc<ImageStore>,
    ) -> Self {
        Self {
            config,
            client,
            runtime,
            images,
            replacements: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Total replacements performed since startup.
    pub fn replacements(&self) -> u64 {
        self.replacements.load(Ordering::Relaxed)
    }

    /// One reconcile cycle: resolve the tag, compare, replace if needed.
    pub async fn poll_once(&self) -> Result<CycleAction> {
        let reference = self.config.compose.image_reference()?;
        let tag = reference.reference_part();
        let desired = self.client.head_manifest(&reference.name, &tag).await?;

        let container_name = &self.config.compose.app.container_name;
        let running = self.runtime.inspect(container_name).await?;

        let current = match &running {
            Some(info) if info.state == ContainerState::Running => {
                Some(info.spec.image_digest.clone())
            }
            _ => None,
        };

        match current {
            Some(current) if current == desired => {
                tracing::debug!(
                    tag = %tag,
                    digest = %desired,
                    "[Supervisor] Tag content unchanged"
                );
                Ok(CycleAction::Unchanged)
            }
            Some(current) => {
                self.replace(&reference.name, container_name, &current, &desired)
                    .await
            }
            None => {
                self.ensure_image(&reference.name, &desired).await?;
                if running.is_some() {
                    // Stale stopped instance from a previous run
                    self.runtime.remove(container_name).await?;
                }
                let spec = self
                    .config
                    .compose
                    .container_spec(desired.clone(), self.config.env.clone())?;
                self.runtime.start(&spec).await?;
                tracing::info!(
                    container = %container_name,
                    digest = %desired,
                    "[Supervisor] Application container started"
                );
                Ok(CycleAction::Started { digest: desired })
            }
        }
    }

    async fn ensure_image(&self, repository: &str, digest: &Digest) -> Result<()> {
        if !self.images.contains(digest).await {
            self.images.pull(&self.client, repository, digest).await?;
        }
        Ok(())
    }

    async fn replace(
        &self,
        repository: &str,
        container_name: &str,
        old: &Digest,
        new: &Digest,
    ) -> Result<CycleAction> {
        tracing::info!(
            container = %container_name,
            old = %old,
            new = %new,
            "[Supervisor] Tag content changed, replacing container"
        );

        // Pull before stopping so the unavailability window is only the
        // stop/start itself
        self.ensure_image(repository, new).await?;

        self.runtime
            .stop(container_name, self.config.stop_timeout)
            .await?;
        self.runtime.remove(container_name).await?;

        let spec = self
            .config
            .compose
            .container_spec(new.clone(), self.config.env.clone())?;
        self.runtime.start(&spec).await?;
        self.replacements.fetch_add(1, Ordering::Relaxed);

        let mut old_image_removed = false;
        if self.config.cleanup {
            self.images.remove(old).await?;
            old_image_removed = true;
        }

        tracing::info!(
            container = %container_name,
            digest = %new,
            cleanup = old_image_removed,
            "[Supervisor] Replacement complete"
        );
        Ok(CycleAction::Replaced {
            old: old.clone(),
            new: new.clone(),
            old_image_removed,
        })
    }

    /// The polling loop. Cycle errors are logged and the loop continues
    /// at the next tick; cancellation stops it promptly.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            image = %self.config.compose.app.image,
            interval_secs = self.config.poll_interval.as_secs(),
            cleanup = self.config.cleanup,
            "[Supervisor] Watching tag"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("[Supervisor] Shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!("[Supervisor] Poll cycle failed: {}", e);
                    }
                }
            }
        }
    }
}
