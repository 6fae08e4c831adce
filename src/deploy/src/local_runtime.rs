//! Process-backed container runtime.
//!
//! Each container is a supervised OS process started from an unpacked
//! image rootfs; there is no namespacing or cgroup isolation. State lives
//! under the runtime root:
//!   containers/<name>/record.json    spec + pid + state
//!   containers/<name>/rootfs/        unpacked image layers
//!   containers/<name>/stdout.log
//!   containers/<name>/stderr.log

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::error::{DeployError, Result};
use crate::images::ImageStore;
use crate::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState};

/// On-disk record of a container; the authoritative copy of its spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContainerRecord {
    info: ContainerInfo,
    pid: Option<u32>,
}

pub struct LocalProcessRuntime {
    state_root: PathBuf,
    images: Arc<ImageStore>,
    children: Mutex<HashMap<String, Child>>,
}

impl LocalProcessRuntime {
    pub fn new(state_root: PathBuf, images: Arc<ImageStore>) -> Result<Self> {
        std::fs::create_dir_all(state_root.join("containers"))?;
        Ok(Self {
            state_root,
            images,
            children: Mutex::new(HashMap::new()),
        })
    }

    fn container_dir(&self, name: &str) -> PathBuf {
        self.state_root.join("containers").join(name)
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.container_dir(name).join("record.json")
    }

    async fn read_record(&self, name: &str) -> Result<Option<ContainerRecord>> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    async fn write_record(&self, record: &ContainerRecord) -> Result<()> {
        let path = self.record_path(&record.info.spec.name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, serde_json::to_vec_pretty(record)?).await?;
        fs::rename(&temp, &path).await?;
        Ok(())
    }

    /// Check whether the recorded process is still alive; demote the
    /// record to Stopped when it is not.
    async fn refresh(&self, mut record: ContainerRecord) -> Result<ContainerRecord> {
        if record.info.state != ContainerState::Running {
            return Ok(record);
        }
        let name = record.info.spec.name.clone();
        let mut children = self.children.lock().await;
        let alive = match children.get_mut(&name) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            // Records can outlive this process (daemon restart); without a
            // child handle the instance is gone.
            None => false,
        };
        if !alive {
            children.remove(&name);
        }
        drop(children);

        if !alive {
            record.info.state = ContainerState::Stopped;
            record.pid = None;
            self.write_record(&record).await?;
        }
        Ok(record)
    }

    /// Unpack every layer of the image into the container rootfs.
    async fn unpack_rootfs(&self, spec: &ContainerSpec, rootfs: &Path) -> Result<()> {
        let manifest = self.images.manifest(&spec.image_digest).await?;
        if rootfs.exists() {
            fs::remove_dir_all(rootfs).await?;
        }
        fs::create_dir_all(rootfs).await?;

        for index in 0..manifest.layers.len() {
            let layer_path = self.images.layer_path(&spec.image_digest, index);
            let rootfs = rootfs.to_path_buf();
            tokio::task::spawn_blocking(move || extract_layer(&layer_path, &rootfs))
                .await
                .map_err(|e| DeployError::Runtime(format!("extract task panicked: {}", e)))??;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for LocalProcessRuntime {
    async fn ping(&self) -> Result<String> {
        fs::create_dir_all(self.state_root.join("containers")).await?;
        Ok(format!("local-process/{}", env!("CARGO_PKG_VERSION")))
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<()> {
        if let Some(record) = self.read_record(&spec.name).await? {
            let record = self.refresh(record).await?;
            if record.info.state == ContainerState::Running {
                return Err(DeployError::ContainerRunning(spec.name.clone()));
            }
        }

        let config = self.images.config(&spec.image_digest).await?;
        if config.cmd.is_empty() {
            return Err(DeployError::Image(format!(
                "image {} has an empty launch command",
                spec.image_digest
            )));
        }

        let dir = self.container_dir(&spec.name);
        let rootfs = dir.join("rootfs");
        self.unpack_rootfs(spec, &rootfs).await?;

        let stdout = std::fs::File::create(dir.join("stdout.log"))?;
        let stderr = std::fs::File::create(dir.join("stderr.log"))?;

        let mut command = Command::new(&config.cmd[0]);
        command
            .args(&config.cmd[1..])
            .current_dir(&rootfs)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        let child = command.spawn().map_err(|e| {
            DeployError::Runtime(format!(
                "failed to launch {} for container {}: {}",
                config.cmd[0], spec.name, e
            ))
        })?;
        let pid = child.id();

        let record = ContainerRecord {
            info: ContainerInfo {
                spec: spec.clone(),
                state: ContainerState::Running,
                started_at: Utc::now(),
            },
            pid,
        };
        self.write_record(&record).await?;
        self.children.lock().await.insert(spec.name.clone(), child);

        tracing::info!(
            container = %spec.name,
            digest = %spec.image_digest,
            port = spec.host_port,
            pid = pid,
            "[Runtime] Container started"
        );
        Ok(())
    }

    async fn stop(&self, name: &str, timeout: Duration) -> Result<()> {
        let mut record = self
            .read_record(name)
            .await?
            .ok_or_else(|| DeployError::ContainerNotFound(name.to_string()))?;

        let child = self.children.lock().await.remove(name);
        if let Some(mut child) = child {
            let _ = child.start_kill();
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(
                        container = %name,
                        status = %status,
                        "[Runtime] Container stopped"
                    );
                }
                Ok(Err(e)) => {
                    return Err(DeployError::Runtime(format!(
                        "failed waiting for container {}: {}",
                        name, e
                    )))
                }
                Err(_) => {
                    return Err(DeployError::Runtime(format!(
                        "container {} did not exit within {:?}",
                        name, timeout
                    )))
                }
            }
        }

        record.info.state = ContainerState::Stopped;
        record.pid = None;
        self.write_record(&record).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let record = self
            .read_record(name)
            .await?
            .ok_or_else(|| DeployError::ContainerNotFound(name.to_string()))?;
        let record = self.refresh(record).await?;
        if record.info.state == ContainerState::Running {
            return Err(DeployError::ContainerRunning(name.to_string()));
        }
        fs::remove_dir_all(self.container_dir(name)).await?;
        tracing::info!(container = %name, "[Runtime] Container removed");
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>> {
        match self.read_record(name).await? {
            Some(record) => Ok(Some(self.refresh(record).await?.info)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>> {
        let dir = self.state_root.join("containers");
        let mut infos = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy().to_string();
            if let Some(record) = self.read_record(&name).await? {
                infos.push(self.refresh(record).await?.info);
            }
        }
        infos.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        Ok(infos)
    }
}

/// Extract one gzipped tar layer into the rootfs. Ownership and original
/// permissions are not preserved; extraction runs unprivileged.
fn extract_layer(layer_path: &Path, rootfs: &Path) -> Result<()> {
    use flate2::read::GzDecoder;

    let file = std::fs::File::open(layer_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(false);
    archive.set_preserve_ownerships(false);
    archive
        .unpack(rootfs)
        .map_err(|e| DeployError::Runtime(format!("failed to unpack layer: {}", e)))?;
    Ok(())
}
