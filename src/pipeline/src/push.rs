//! Registry push: upload the blobs a build produced, then tag the
//! manifest. Every push lands the immutable `b-<hex12>` build tag before
//! the moving tag pointer moves, so the pointed-at manifest always has an
//! immutable record.

use registry::{Digest, RegistryClient};

use crate::build::ImageArtifact;
use crate::error::{PipelineError, Result};

/// What a push did: the digest now reachable under both tags, and how many
/// blobs actually travelled.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub repository: String,
    pub moving_tag: String,
    pub build_tag: String,
    pub manifest_digest: Digest,
    pub blobs_uploaded: usize,
    pub blobs_skipped: usize,
}

pub struct Pusher {
    client: RegistryClient,
}

impl Pusher {
    pub fn new(client: RegistryClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    /// Upload the artifact and point `moving_tag` at it. Existing blobs are
    /// skipped; re-pushing identical content is a no-op apart from the tag
    /// write.
    pub async fn push(&self, artifact: &ImageArtifact, moving_tag: &str) -> Result<PushOutcome> {
        let repository = &artifact.repository;
        let mut uploaded = 0usize;
        let mut skipped = 0usize;

        // The artifact carries bytes for exactly one layer
        let layer = match artifact.manifest.layers.as_slice() {
            [layer] => layer,
            layers => {
                return Err(PipelineError::Push(format!(
                    "artifact manifest references {} layers, expected exactly one",
                    layers.len()
                )))
            }
        };
        let blobs: [(&Digest, &Vec<u8>); 2] = [
            (&artifact.manifest.config.digest, &artifact.config_bytes),
            (&layer.digest, &artifact.layer_bytes),
        ];
        for (digest, data) in blobs {
            if self.client.blob_exists(repository, digest).await? {
                skipped += 1;
                tracing::debug!(
                    repository = %repository,
                    digest = %digest,
                    "[Pusher] Blob already present, skipping upload"
                );
            } else {
                self.client
                    .put_blob(repository, digest, data.clone())
                    .await?;
                uploaded += 1;
            }
        }

        let build_tag = artifact.build_tag();
        let recorded = self
            .client
            .put_manifest(repository, &build_tag, artifact.manifest_bytes.clone())
            .await?;
        if recorded != artifact.manifest_digest {
            return Err(PipelineError::Push(format!(
                "registry recorded digest {} for build {}, expected {}",
                recorded, build_tag, artifact.manifest_digest
            )));
        }

        self.client
            .put_manifest(repository, moving_tag, artifact.manifest_bytes.clone())
            .await?;

        tracing::info!(
            repository = %repository,
            moving_tag = %moving_tag,
            build_tag = %build_tag,
            digest = %artifact.manifest_digest,
            uploaded,
            skipped,
            "[Pusher] Image pushed"
        );

        Ok(PushOutcome {
            repository: repository.clone(),
            moving_tag: moving_tag.to_string(),
            build_tag,
            manifest_digest: artifact.manifest_digest.clone(),
            blobs_uploaded: uploaded,
            blobs_skipped: skipped,
        })
    }
}
