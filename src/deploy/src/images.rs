//! Local image store on the deployment host.
//!
//! Images are keyed by manifest digest, one directory per image:
//!   images/<hex>/manifest.json
//!   images/<hex>/config.json
//!   images/<hex>/layer-<n>.tar.gz
//!
//! A pull is staged into a temp directory and renamed into place, so a
//! partially downloaded image is never visible as present.

use std::path::{Path, PathBuf};
use tokio::fs;

use registry::manifest::ImageConfig;
use registry::{Digest, ImageManifest, RegistryClient};

use crate::error::{DeployError, Result};

pub struct ImageStore {
    base_dir: PathBuf,
}

impl ImageStore {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn image_dir(&self, digest: &Digest) -> PathBuf {
        self.base_dir.join(digest.hex())
    }

    /// An image is present once its directory has been renamed into place.
    pub async fn contains(&self, digest: &Digest) -> bool {
        self.image_dir(digest).join("manifest.json").exists()
    }

    /// Pull manifest, config and layers for `digest` from the registry.
    /// Already-present images are left alone.
    pub async fn pull(
        &self,
        client: &RegistryClient,
        repository: &str,
        digest: &Digest,
    ) -> Result<PathBuf> {
        let dir = self.image_dir(digest);
        if self.contains(digest).await {
            tracing::debug!(digest = %digest, "[ImageStore] Image already present");
            return Ok(dir);
        }

        let (manifest_bytes, recorded) = client.get_manifest(repository, digest.as_str()).await?;
        if recorded != *digest {
            return Err(DeployError::Image(format!(
                "registry returned digest {} for requested {}",
                recorded, digest
            )));
        }
        let manifest = ImageManifest::from_bytes(&manifest_bytes)?;

        let staging = self.base_dir.join(format!(".pull-{}", digest.short()));
        if staging.exists() {
            fs::remove_dir_all(&staging).await?;
        }
        fs::create_dir_all(&staging).await?;

        let config_bytes = client.get_blob(repository, &manifest.config.digest).await?;
        fs::write(staging.join("config.json"), &config_bytes).await?;
        for (index, layer) in manifest.layers.iter().enumerate() {
            let layer_bytes = client.get_blob(repository, &layer.digest).await?;
            fs::write(staging.join(format!("layer-{}.tar.gz", index)), &layer_bytes).await?;
        }
        fs::write(staging.join("manifest.json"), &manifest_bytes).await?;

        if dir.exists() {
            // Another puller won the race; content-addressed, so identical
            fs::remove_dir_all(&staging).await?;
            return Ok(dir);
        }
        fs::rename(&staging, &dir).await?;

        tracing::info!(
            repository = %repository,
            digest = %digest,
            layers = manifest.layers.len(),
            "[ImageStore] Image pulled"
        );
        Ok(dir)
    }

    pub async fn manifest(&self, digest: &Digest) -> Result<ImageManifest> {
        let data = fs::read(self.image_dir(digest).join("manifest.json"))
            .await
            .map_err(|_| DeployError::Image(format!("image {} is not present", digest)))?;
        Ok(ImageManifest::from_bytes(&data)?)
    }

    pub async fn config(&self, digest: &Digest) -> Result<ImageConfig> {
        let data = fs::read(self.image_dir(digest).join("config.json"))
            .await
            .map_err(|_| DeployError::Image(format!("image {} is not present", digest)))?;
        Ok(ImageConfig::from_bytes(&data)?)
    }

    /// Path of one layer archive of a present image.
    pub fn layer_path(&self, digest: &Digest, index: usize) -> PathBuf {
        self.image_dir(digest).join(format!("layer-{}.tar.gz", index))
    }

    /// Delete an image from the store. Missing images are a no-op.
    pub async fn remove(&self, digest: &Digest) -> Result<()> {
        let dir = self.image_dir(digest);
        if dir.exists() {
            fs::remove_dir_all(&dir).await?;
            tracing::info!(digest = %digest, "[ImageStore] Image removed");
        }
        Ok(())
    }

    /// Digests of every present image.
    pub async fn list(&self) -> Result<Vec<Digest>> {
        let mut digests = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Ok(digest) = Digest::parse(&format!("sha256:{}", name)) {
                if self.contains(&digest).await {
                    digests.push(digest);
                }
            }
        }
        digests.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(digests)
    }
}
