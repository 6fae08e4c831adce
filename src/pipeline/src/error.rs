use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Build error: {0}")]
    Build(String),

    #[error("Push error: {0}")]
    Push(String),

    #[error("Trigger error: {0}")]
    Trigger(String),

    #[error("Registry error: {0}")]
    Registry(#[from] registry::RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
