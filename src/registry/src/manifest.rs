//! Image manifest and image config documents.
//!
//! A manifest names a config blob and an ordered list of layer blobs by
//! digest. Manifests and blobs are immutable once written; only tags move.
//! Serialization goes through serde structs with a fixed field order, so
//! identical content always produces identical bytes and digests.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::Result;

/// Media type for image manifests.
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type for image config blobs.
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// Media type for gzipped tar layer blobs.
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Accept header offered when fetching manifests.
pub const MANIFEST_ACCEPT_HEADER: &str =
    "application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.v2+json";

/// Reference to a blob: media type, digest and size in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
}

/// Image manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            config,
            layers,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Digests of every blob the manifest references (config first).
    pub fn referenced_blobs(&self) -> Vec<Digest> {
        let mut digests = Vec::with_capacity(1 + self.layers.len());
        digests.push(self.config.digest.clone());
        for layer in &self.layers {
            digests.push(layer.digest.clone());
        }
        digests
    }
}

/// Image config blob: everything the runtime needs to start the workload.
///
/// Deliberately carries no timestamps so that building identical source
/// twice yields byte-identical config and therefore identical digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// TCP port the workload listens on
    pub exposed_port: u16,
    /// Launch command (argv form)
    pub cmd: Vec<String>,
    /// Environment variable names the workload reads at startup
    #[serde(default)]
    pub env_keys: Vec<String>,
    /// Base image the build started from
    pub base_image: String,
    /// Digest of the source layer
    pub source_digest: Digest,
}

impl ImageConfig {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
