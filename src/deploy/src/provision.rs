//! Idempotent host provisioning.
//!
//! A plan is an ordered list of named steps, each checked first and
//! applied only when unsatisfied, so re-running a plan converges: steps
//! already satisfied report `unchanged`. The first failing step aborts
//! the plan.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use registry::RegistryClient;

use crate::compose::{parse_env_file, ComposeSpec, COMPOSE_FILE_NAME};
use crate::error::{DeployError, Result};
use crate::images::ImageStore;
use crate::runtime::{ContainerRuntime, ContainerState};

/// Target host description. The plan executes on the host itself; the
/// address is recorded for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSpec {
    pub address: String,
    /// Whether privileged system changes (user creation) may be attempted
    pub elevate: bool,
    /// Application directory holding secrets, compose file and data
    pub app_dir: PathBuf,
    /// Designated app user; when unset the current user is assumed
    #[serde(default)]
    pub app_user: Option<String>,
}

/// Streaming progress for provisioning runs.
pub trait ProgressReporter: Send + Sync {
    fn emit(&self, percentage: u32, message: String);
}

/// Reports progress to the log.
pub struct LogProgressReporter;

impl ProgressReporter for LogProgressReporter {
    fn emit(&self, percentage: u32, message: String) {
        tracing::info!("[Provisioner] {:>3}% {}", percentage, message);
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionProgress {
    pub percentage: u32,
    pub message: String,
}

/// Channel-based progress reporter.
pub struct ChannelProgressReporter {
    sender: tokio::sync::mpsc::Sender<ProvisionProgress>,
}

impl ChannelProgressReporter {
    pub fn new(sender: tokio::sync::mpsc::Sender<ProvisionProgress>) -> Self {
        Self { sender }
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn emit(&self, percentage: u32, message: String) {
        let _ = self.sender.try_send(ProvisionProgress {
            percentage,
            message,
        });
    }
}

/// Everything the steps act on.
pub struct ProvisionContext {
    pub host: HostSpec,
    pub compose: ComposeSpec,
    /// Externally supplied secret (the database URL); written to the env
    /// file, never committed and never logged.
    pub secret: String,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub images: Arc<ImageStore>,
    pub client: RegistryClient,
}

impl ProvisionContext {
    fn env_file_path(&self) -> PathBuf {
        self.host.app_dir.join(&self.compose.app.env_file)
    }

    /// Content of the secrets file: the database URL plus the port the
    /// workload should bind.
    fn env_file_content(&self) -> String {
        format!(
            "TODO_DATABASE_URL={}\nTODO_PORT={}\n",
            self.secret, self.compose.app.container_port
        )
    }

    async fn app_env(&self) -> Result<BTreeMap<String, String>> {
        let content = fs::read_to_string(self.env_file_path()).await?;
        parse_env_file(&content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Unchanged,
    Changed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReport {
    pub steps: Vec<StepReport>,
}

impl PlanReport {
    /// True when every step was already satisfied.
    pub fn converged(&self) -> bool {
        self.steps
            .iter()
            .all(|step| step.status == StepStatus::Unchanged)
    }
}

/// One named idempotent provisioning step.
#[async_trait]
pub trait ProvisionStep: Send + Sync {
    fn name(&self) -> &str;

    /// True when the step's desired state already holds.
    async fn check(&self, ctx: &ProvisionContext) -> Result<bool>;

    /// Establish the desired state. Only called when `check` was false.
    async fn apply(&self, ctx: &ProvisionContext) -> Result<()>;
}

pub struct ProvisionPlan {
    steps: Vec<Box<dyn ProvisionStep>>,
}

impl ProvisionPlan {
    /// The standard six-step plan: runtime, user, directory, secrets,
    /// compose file, service reconcile.
    pub fn standard() -> Self {
        Self {
            steps: vec![
                Box::new(ContainerRuntimeStep),
                Box::new(AppUserStep),
                Box::new(AppDirStep),
                Box::new(SecretsFileStep),
                Box::new(ComposeFileStep),
                Box::new(ReconcileServicesStep),
            ],
        }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Run all steps in order. Fatal on the first failing step; the error
    /// names the step.
    pub async fn run(
        &self,
        ctx: &ProvisionContext,
        reporter: &dyn ProgressReporter,
    ) -> Result<PlanReport> {
        let total = self.steps.len() as u32;
        let mut reports = Vec::with_capacity(self.steps.len());

        for (index, step) in self.steps.iter().enumerate() {
            let percentage = index as u32 * 100 / total;
            reporter.emit(percentage, step.name().to_string());

            let satisfied = step.check(ctx).await.map_err(|e| step_error(step.name(), e))?;
            let status = if satisfied {
                tracing::debug!(step = step.name(), "[Provisioner] Step already satisfied");
                StepStatus::Unchanged
            } else {
                step.apply(ctx).await.map_err(|e| step_error(step.name(), e))?;
                tracing::info!(step = step.name(), "[Provisioner] Step applied");
                StepStatus::Changed
            };
            reports.push(StepReport {
                name: step.name().to_string(),
                status,
            });
        }

        reporter.emit(100, "done".to_string());
        Ok(PlanReport { steps: reports })
    }
}

fn step_error(step: &str, error: DeployError) -> DeployError {
    match error {
        already @ DeployError::Provision { .. } => already,
        other => DeployError::Provision {
            step: step.to_string(),
            message: other.to_string(),
        },
    }
}

// ---- the six standard steps ----

/// Ensure the container runtime answers a version probe.
struct ContainerRuntimeStep;

#[async_trait]
impl ProvisionStep for ContainerRuntimeStep {
    fn name(&self) -> &str {
        "container runtime"
    }

    async fn check(&self, ctx: &ProvisionContext) -> Result<bool> {
        Ok(ctx.runtime.ping().await.is_ok())
    }

    async fn apply(&self, ctx: &ProvisionContext) -> Result<()> {
        let version = ctx.runtime.ping().await?;
        tracing::info!(version = %version, "[Provisioner] Container runtime ready");
        Ok(())
    }
}

/// Ensure the designated app user exists. Without a designated user the
/// step is a no-op; without elevation a missing user is an error.
struct AppUserStep;

#[async_trait]
impl ProvisionStep for AppUserStep {
    fn name(&self) -> &str {
        "app user"
    }

    async fn check(&self, ctx: &ProvisionContext) -> Result<bool> {
        let Some(user) = &ctx.host.app_user else {
            return Ok(true);
        };
        let status = tokio::process::Command::new("id")
            .arg("-u")
            .arg(user)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await?;
        Ok(status.success())
    }

    async fn apply(&self, ctx: &ProvisionContext) -> Result<()> {
        let Some(user) = &ctx.host.app_user else {
            return Ok(());
        };
        if !ctx.host.elevate {
            return Err(DeployError::Provision {
                step: self.name().to_string(),
                message: format!("user {} does not exist and elevation is disabled", user),
            });
        }
        let output = tokio::process::Command::new("useradd")
            .arg("--system")
            .arg(user)
            .output()
            .await?;
        if !output.status.success() {
            return Err(DeployError::Provision {
                step: self.name().to_string(),
                message: format!(
                    "useradd {} failed: {}",
                    user,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

/// Ensure the application directory exists.
struct AppDirStep;

#[async_trait]
impl ProvisionStep for AppDirStep {
    fn name(&self) -> &str {
        "app directory"
    }

    async fn check(&self, ctx: &ProvisionContext) -> Result<bool> {
        Ok(ctx.host.app_dir.is_dir())
    }

    async fn apply(&self, ctx: &ProvisionContext) -> Result<()> {
        fs::create_dir_all(&ctx.host.app_dir).await?;
        Ok(())
    }
}

/// Materialize the secrets file (0600) from the supplied secret value.
struct SecretsFileStep;

#[async_trait]
impl ProvisionStep for SecretsFileStep {
    fn name(&self) -> &str {
        "secrets file"
    }

    async fn check(&self, ctx: &ProvisionContext) -> Result<bool> {
        let path = ctx.env_file_path();
        if !path.exists() {
            return Ok(false);
        }
        let existing = fs::read_to_string(&path).await?;
        if existing != ctx.env_file_content() {
            return Ok(false);
        }
        Ok(file_mode_is_0600(&path))
    }

    async fn apply(&self, ctx: &ProvisionContext) -> Result<()> {
        let path = ctx.env_file_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp = path.with_extension("env.tmp");
        fs::write(&temp, ctx.env_file_content()).await?;
        set_mode_0600(&temp).await?;
        fs::rename(&temp, &path).await?;
        tracing::info!(path = %path.display(), "[Provisioner] Secrets file written");
        Ok(())
    }
}

/// Write the compose definition atomically from the desired spec.
struct ComposeFileStep;

#[async_trait]
impl ProvisionStep for ComposeFileStep {
    fn name(&self) -> &str {
        "compose definition"
    }

    async fn check(&self, ctx: &ProvisionContext) -> Result<bool> {
        let path = ctx.host.app_dir.join(COMPOSE_FILE_NAME);
        if !path.exists() {
            return Ok(false);
        }
        match ComposeSpec::load(&path).await {
            Ok(existing) => Ok(existing == ctx.compose),
            Err(_) => Ok(false),
        }
    }

    async fn apply(&self, ctx: &ProvisionContext) -> Result<()> {
        let path = ctx.host.app_dir.join(COMPOSE_FILE_NAME);
        ctx.compose.save(&path).await?;
        tracing::info!(path = %path.display(), "[Provisioner] Compose file written");
        Ok(())
    }
}

/// Start any compose service not currently running. Running services are
/// left alone; the supervisor handles updates from here on.
struct ReconcileServicesStep;

#[async_trait]
impl ProvisionStep for ReconcileServicesStep {
    fn name(&self) -> &str {
        "reconcile services"
    }

    async fn check(&self, ctx: &ProvisionContext) -> Result<bool> {
        let info = ctx.runtime.inspect(&ctx.compose.app.container_name).await?;
        Ok(matches!(info, Some(info) if info.state == ContainerState::Running))
    }

    async fn apply(&self, ctx: &ProvisionContext) -> Result<()> {
        let reference = ctx.compose.image_reference()?;
        let tag = reference.reference_part();
        let digest = ctx.client.head_manifest(&reference.name, &tag).await?;
        if !ctx.images.contains(&digest).await {
            ctx.images.pull(&ctx.client, &reference.name, &digest).await?;
        }

        let env = ctx.app_env().await?;
        let spec = ctx.compose.container_spec(digest.clone(), env)?;
        ctx.runtime.start(&spec).await?;

        tracing::info!(
            container = %spec.name,
            digest = %digest,
            "[Provisioner] Application service started"
        );
        Ok(())
    }
}

#[cfg(unix)]
fn file_mode_is_0600(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o777 == 0o600)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn file_mode_is_0600(_path: &Path) -> bool {
    true
}

#[cfg(unix)]
async fn set_mode_0600(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode_0600(_path: &Path) -> Result<()> {
    Ok(())
}
