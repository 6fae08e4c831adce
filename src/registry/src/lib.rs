pub mod client;
pub mod digest;
pub mod error;
pub mod manifest;
pub mod reference;
pub mod server;
pub mod store;

pub use client::RegistryClient;
pub use digest::Digest;
pub use error::{RegistryError, Result};
pub use manifest::{Descriptor, ImageConfig, ImageManifest};
pub use reference::ImageReference;
pub use store::{RegistryStore, BUILD_TAG_PREFIX};

/// Serve a registry backed by on-disk storage at `data_dir`.
pub async fn start_server(
    data_dir: std::path::PathBuf,
    bind_address: &str,
    port: u16,
    auth_token: Option<String>,
) -> Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let store = std::sync::Arc::new(RegistryStore::new(data_dir)?);
    server::start_server(store, bind_address, port, auth_token).await
}
