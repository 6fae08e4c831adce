//! Deterministic image builds.
//!
//! A build turns a source tree into one gzipped tar layer plus config and
//! manifest documents. All archive metadata is normalized (sorted walk
//! order, zero mtime, uid/gid 0, stable modes), so identical source always
//! produces identical layer bytes and therefore identical digests.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use registry::manifest::{CONFIG_MEDIA_TYPE, LAYER_MEDIA_TYPE};
use registry::store::BUILD_TAG_PREFIX;
use registry::{Descriptor, Digest, ImageConfig, ImageManifest};

use crate::error::{PipelineError, Result};

/// Directories never included in an image layer.
const EXCLUDED_DIRS: &[&str] = &[".git", ".hg", "target", "node_modules"];

/// Everything a build needs besides the source tree itself.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    /// Repository name the image will be pushed under, e.g. "todo/app"
    pub image_name: String,
    /// Root of the application source tree
    pub source_dir: PathBuf,
    /// Base image reference recorded in the image config
    pub base_image: String,
    /// TCP port the workload listens on
    pub exposed_port: u16,
    /// Launch command (argv form)
    pub cmd: Vec<String>,
    /// Environment variable names the workload reads at startup
    pub env_keys: Vec<String>,
}

impl BuildSpec {
    pub fn validate(&self) -> Result<()> {
        if self.image_name.is_empty() {
            return Err(PipelineError::Build("image name is empty".to_string()));
        }
        if self.cmd.is_empty() {
            return Err(PipelineError::Build("launch command is empty".to_string()));
        }
        if !self.source_dir.is_dir() {
            return Err(PipelineError::Build(format!(
                "source directory {} does not exist",
                self.source_dir.display()
            )));
        }
        Ok(())
    }
}

/// A finished build: manifest plus the raw bytes of every referenced blob.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    pub repository: String,
    pub manifest: ImageManifest,
    pub manifest_bytes: Vec<u8>,
    pub manifest_digest: Digest,
    pub config_bytes: Vec<u8>,
    pub layer_bytes: Vec<u8>,
}

impl ImageArtifact {
    /// Immutable per-build tag: `b-` plus the first 12 hex of the manifest
    /// digest.
    pub fn build_tag(&self) -> String {
        format!("{}{}", BUILD_TAG_PREFIX, self.manifest_digest.short())
    }
}

pub struct ImageBuilder;

impl ImageBuilder {
    /// Build an image from the spec. Fatal on any missing or unreadable
    /// source file; there is no retry.
    pub fn build(spec: &BuildSpec) -> Result<ImageArtifact> {
        spec.validate()?;

        let files = collect_files(&spec.source_dir)?;
        if files.is_empty() {
            return Err(PipelineError::Build(format!(
                "source tree {} contains no files",
                spec.source_dir.display()
            )));
        }

        let layer_bytes = build_layer(&files)?;
        let layer_digest = Digest::of_bytes(&layer_bytes);

        let config = ImageConfig {
            exposed_port: spec.exposed_port,
            cmd: spec.cmd.clone(),
            env_keys: spec.env_keys.clone(),
            base_image: spec.base_image.clone(),
            source_digest: layer_digest.clone(),
        };
        let config_bytes = config.to_bytes()?;
        let config_digest = Digest::of_bytes(&config_bytes);

        let manifest = ImageManifest::new(
            Descriptor {
                media_type: CONFIG_MEDIA_TYPE.to_string(),
                digest: config_digest,
                size: config_bytes.len() as u64,
            },
            vec![Descriptor {
                media_type: LAYER_MEDIA_TYPE.to_string(),
                digest: layer_digest,
                size: layer_bytes.len() as u64,
            }],
        );
        let manifest_bytes = manifest.to_bytes()?;
        let manifest_digest = Digest::of_bytes(&manifest_bytes);

        tracing::info!(
            "[ImageBuilder] Built {} from {} ({} files, layer {} bytes, digest {})",
            spec.image_name,
            spec.source_dir.display(),
            files.len(),
            layer_bytes.len(),
            manifest_digest
        );

        Ok(ImageArtifact {
            repository: spec.image_name.clone(),
            manifest,
            manifest_bytes,
            manifest_digest,
            config_bytes,
            layer_bytes,
        })
    }
}

/// Walk the source tree in sorted order, returning (archive path, absolute
/// path) pairs for regular files.
fn collect_files(source_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir() && EXCLUDED_DIRS.contains(&name.as_ref()))
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            PipelineError::Build(format!("failed to walk source tree: {}", e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| PipelineError::Build(format!("path outside source tree: {}", e)))?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        files.push((rel, entry.path().to_path_buf()));
    }
    Ok(files)
}

/// Produce the gzipped tar layer with normalized entry metadata.
fn build_layer(files: &[(String, PathBuf)]) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (rel, abs) in files {
        let data = std::fs::read(abs)
            .map_err(|e| PipelineError::Build(format!("failed to read {}: {}", rel, e)))?;
        let metadata = std::fs::metadata(abs)
            .map_err(|e| PipelineError::Build(format!("failed to stat {}: {}", rel, e)))?;

        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(entry_mode(&metadata));
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder
            .append_data(&mut header, rel, data.as_slice())
            .map_err(|e| PipelineError::Build(format!("failed to archive {}: {}", rel, e)))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| PipelineError::Build(format!("failed to finish archive: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| PipelineError::Build(format!("failed to finish compression: {}", e)))
}

#[cfg(unix)]
fn entry_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn entry_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}
