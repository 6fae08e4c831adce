//! Container runtime abstraction.
//!
//! Containers are replaced, never mutated: a running instance records the
//! image digest it was started from, and updating means stopping it and
//! starting a new one pinned to the new digest.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use registry::Digest;

use crate::error::{DeployError, Result};

/// Lifecycle state of a container instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Running,
    Stopped,
    Failed,
}

/// Everything needed to start a container. The digest pin means two
/// containers started from the same spec always run identical content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name, unique per host
    pub name: String,
    /// Repository the image came from, e.g. "todo/app"
    pub repository: String,
    /// Manifest digest the container is pinned to
    pub image_digest: Digest,
    /// Port published on the host
    pub host_port: u16,
    /// Port the workload listens on inside the container
    pub container_port: u16,
    /// Environment passed to the workload (sorted, so specs compare stably)
    pub env: BTreeMap<String, String>,
}

/// A container instance as the runtime sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub spec: ContainerSpec,
    pub state: ContainerState,
    pub started_at: DateTime<Utc>,
}

/// Container lifecycle operations.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Version probe; also verifies the runtime is serviceable.
    async fn ping(&self) -> Result<String>;

    /// Start a container from a spec. The image must already be present
    /// in the local image store.
    async fn start(&self, spec: &ContainerSpec) -> Result<()>;

    /// Stop a running container, waiting at most `timeout` for it to exit.
    async fn stop(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Remove a stopped container and its on-disk state.
    async fn remove(&self, name: &str) -> Result<()>;

    /// Look up a container by name.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>>;

    /// All containers the runtime knows about.
    async fn list(&self) -> Result<Vec<ContainerInfo>>;

    /// Restart the same container: stop it and start it again from the
    /// spec it already runs. No image change.
    async fn restart(&self, name: &str, timeout: Duration) -> Result<()> {
        let info = self
            .inspect(name)
            .await?
            .ok_or_else(|| DeployError::ContainerNotFound(name.to_string()))?;
        if info.state == ContainerState::Running {
            self.stop(name, timeout).await?;
        }
        self.start(&info.spec).await
    }
}
