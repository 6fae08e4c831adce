//! The two-service composition definition the provisioner installs and
//! the supervisor reads: the application container and the supervisor
//! watching its image tag.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

use registry::ImageReference;

use crate::error::{DeployError, Result};

/// Name of the composition file inside the application directory.
pub const COMPOSE_FILE_NAME: &str = "compose.yaml";

/// Name of the secrets file the application env comes from.
pub const ENV_FILE_NAME: &str = ".env";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeSpec {
    pub app: AppService,
    pub supervisor: SupervisorService,
}

/// The application container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppService {
    /// Image reference with the moving tag, e.g. "localhost:5000/todo/app:latest"
    pub image: String,
    #[serde(default = "default_container_name")]
    pub container_name: String,
    /// Port published on the host
    pub host_port: u16,
    /// Port the workload listens on
    pub container_port: u16,
    /// Environment file, relative to the application directory
    #[serde(default = "default_env_file")]
    pub env_file: String,
    /// Only "always" is supported
    #[serde(default = "default_restart")]
    pub restart: String,
    #[serde(default)]
    pub healthcheck: HealthCheckSpec,
}

/// HTTP probe parameters for the application service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_retries")]
    pub retries: u32,
}

/// The supervisor sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorService {
    /// Which compose service the supervisor watches
    #[serde(default = "default_watched_service")]
    pub watched_service: String,
    /// Registry polling interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Delete the old image after a replacement
    #[serde(default)]
    pub cleanup: bool,
}

fn default_container_name() -> String {
    "todo-app".to_string()
}

fn default_env_file() -> String {
    ENV_FILE_NAME.to_string()
}

fn default_restart() -> String {
    "always".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    10
}

fn default_health_retries() -> u32 {
    5
}

fn default_watched_service() -> String {
    "app".to_string()
}

fn default_poll_interval() -> u64 {
    300
}

impl Default for HealthCheckSpec {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            interval_secs: default_health_interval(),
            timeout_secs: default_health_timeout(),
            retries: default_health_retries(),
        }
    }
}

impl ComposeSpec {
    /// The canonical two-service definition for an image reference.
    pub fn standard(image: &str, host_port: u16, container_port: u16) -> Self {
        Self {
            app: AppService {
                image: image.to_string(),
                container_name: default_container_name(),
                host_port,
                container_port,
                env_file: default_env_file(),
                restart: default_restart(),
                healthcheck: HealthCheckSpec::default(),
            },
            supervisor: SupervisorService {
                watched_service: default_watched_service(),
                poll_interval_secs: default_poll_interval(),
                cleanup: true,
            },
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).await.map_err(|e| {
            DeployError::Compose(format!("cannot read {}: {}", path.display(), e))
        })?;
        let spec: ComposeSpec = serde_yaml::from_str(&data)?;
        spec.validate()
            .map_err(|e| DeployError::Compose(format!("{}: {}", path.display(), e)))?;
        Ok(spec)
    }

    /// Atomic write: temp file in the target directory, then rename.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp = path.with_extension("yaml.tmp");
        fs::write(&temp, data.as_bytes()).await?;
        fs::rename(&temp, path).await?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        ImageReference::parse(&self.app.image)
            .map_err(|e| format!("app.image: {}", e))?;
        if self.app.container_name.is_empty() {
            return Err("app.container_name is empty".to_string());
        }
        if self.app.restart != "always" {
            return Err(format!(
                "app.restart: only \"always\" is supported, got \"{}\"",
                self.app.restart
            ));
        }
        if self.app.healthcheck.retries == 0 {
            return Err("app.healthcheck.retries must be at least 1".to_string());
        }
        if self.app.healthcheck.interval_secs == 0 {
            return Err("app.healthcheck.interval_secs must be at least 1".to_string());
        }
        if self.supervisor.watched_service != "app" {
            return Err(format!(
                "supervisor.watched_service: unknown service \"{}\"",
                self.supervisor.watched_service
            ));
        }
        if self.supervisor.poll_interval_secs == 0 {
            return Err("supervisor.poll_interval_secs must be at least 1".to_string());
        }
        Ok(())
    }

    /// Parsed form of the app image reference.
    pub fn image_reference(&self) -> Result<ImageReference> {
        Ok(ImageReference::parse(&self.app.image)?)
    }

    /// Container spec for the app service pinned to a concrete digest.
    /// Port and environment come from the compose definition, so every
    /// replacement container gets the same configuration.
    pub fn container_spec(
        &self,
        digest: registry::Digest,
        env: BTreeMap<String, String>,
    ) -> Result<crate::runtime::ContainerSpec> {
        let reference = self.image_reference()?;
        Ok(crate::runtime::ContainerSpec {
            name: self.app.container_name.clone(),
            repository: reference.name,
            image_digest: digest,
            host_port: self.app.host_port,
            container_port: self.app.container_port,
            env,
        })
    }
}

/// Parse a KEY=VALUE env file into a sorted map. Blank lines and `#`
/// comments are ignored; values keep embedded `=` signs.
pub fn parse_env_file(content: &str) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            DeployError::Compose(format!("env file line {} is not KEY=VALUE", number + 1))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(DeployError::Compose(format!(
                "env file line {} has an empty key",
                number + 1
            )));
        }
        env.insert(key.to_string(), value.trim().to_string());
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_spec_is_valid_and_round_trips() {
        let spec = ComposeSpec::standard("localhost:5000/todo/app:latest", 3000, 3000);
        assert!(spec.validate().is_ok());

        let yaml = serde_yaml::to_string(&spec).unwrap();
        let parsed: ComposeSpec = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn defaults_fill_in_missing_fields() {
        let yaml = "\
app:
  image: todo/app:latest
  host_port: 3000
  container_port: 3000
supervisor: {}
";
        let spec: ComposeSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.app.container_name, "todo-app");
        assert_eq!(spec.app.healthcheck.interval_secs, 30);
        assert_eq!(spec.app.healthcheck.timeout_secs, 10);
        assert_eq!(spec.app.healthcheck.retries, 5);
        assert_eq!(spec.supervisor.poll_interval_secs, 300);
        assert!(!spec.supervisor.cleanup);
    }

    #[test]
    fn rejects_unsupported_restart_policy() {
        let mut spec = ComposeSpec::standard("todo/app:latest", 3000, 3000);
        spec.app.restart = "never".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn parses_env_files() {
        let env = parse_env_file(
            "# secrets\nTODO_DATABASE_URL=file:///data/todos.json\n\nTODO_PORT=3000\n",
        )
        .unwrap();
        assert_eq!(
            env.get("TODO_DATABASE_URL").map(String::as_str),
            Some("file:///data/todos.json")
        );
        assert_eq!(env.get("TODO_PORT").map(String::as_str), Some("3000"));

        assert!(parse_env_file("NOT A PAIR").is_err());
        assert!(parse_env_file("=value").is_err());
    }
}
