use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeployError>;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container already running: {0}")]
    ContainerRunning(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Compose error: {0}")]
    Compose(String),

    #[error("Provision step '{step}' failed: {message}")]
    Provision { step: String, message: String },

    #[error("Registry error: {0}")]
    Registry(#[from] registry::RegistryError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
