//! Content-addressed on-disk store backing the registry.
//!
//! Layout under the base directory:
//!   blobs/sha256/<hex>                          blob content
//!   manifests/<repository>/sha256/<hex>.json    manifest content
//!   manifests/<repository>/tags/<tag>.digest    tag-to-digest pointer
//!
//! Blobs and manifests are immutable once written; tags are the only
//! mutable pointers, and `b-<hex12>` build tags refuse to move once set.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;

use crate::digest::Digest;
use crate::error::{RegistryError, Result};

/// Prefix of immutable per-build tags.
pub const BUILD_TAG_PREFIX: &str = "b-";

pub struct RegistryStore {
    base_dir: PathBuf,
    blobs_dir: PathBuf,
    manifests_dir: PathBuf,
}

impl RegistryStore {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        let blobs_dir = base_dir.join("blobs").join("sha256");
        let manifests_dir = base_dir.join("manifests");

        std::fs::create_dir_all(&blobs_dir)?;
        std::fs::create_dir_all(&manifests_dir)?;

        Ok(Self {
            base_dir,
            blobs_dir,
            manifests_dir,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    // ---- blobs ----

    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blobs_dir.join(digest.hex())
    }

    pub async fn blob_exists(&self, digest: &Digest) -> bool {
        self.blob_path(digest).exists()
    }

    pub async fn blob_size(&self, digest: &Digest) -> Option<u64> {
        match fs::metadata(self.blob_path(digest)).await {
            Ok(metadata) => Some(metadata.len()),
            Err(_) => None,
        }
    }

    pub async fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        fs::read(self.blob_path(digest))
            .await
            .map_err(|_| RegistryError::NotFound(format!("blob {}", digest)))
    }

    /// Write a blob, verifying the content matches the digest.
    pub async fn write_blob(&self, digest: &Digest, data: &[u8]) -> Result<()> {
        let actual = Digest::of_bytes(data);
        if actual != *digest {
            return Err(RegistryError::DigestMismatch {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }

        let path = self.blob_path(digest);
        if path.exists() {
            // Content-addressed: an existing blob is already the right bytes
            return Ok(());
        }
        write_atomic(&path, data).await?;

        tracing::debug!(digest = %digest, size = data.len(), "[RegistryStore] Blob written");
        Ok(())
    }

    pub async fn delete_blob(&self, digest: &Digest) -> Result<()> {
        let path = self.blob_path(digest);
        if path.exists() {
            fs::remove_file(&path).await?;
            tracing::debug!(digest = %digest, "[RegistryStore] Blob deleted");
        }
        Ok(())
    }

    // ---- manifests ----

    fn manifest_path(&self, repository: &str, digest: &Digest) -> PathBuf {
        self.manifests_dir
            .join(repository)
            .join("sha256")
            .join(format!("{}.json", digest.hex()))
    }

    fn tag_path(&self, repository: &str, tag: &str) -> PathBuf {
        self.manifests_dir
            .join(repository)
            .join("tags")
            .join(format!("{}.digest", tag))
    }

    pub async fn manifest_exists(&self, repository: &str, digest: &Digest) -> bool {
        self.manifest_path(repository, digest).exists()
    }

    /// Store manifest bytes under their own digest; returns that digest.
    pub async fn put_manifest(&self, repository: &str, data: &[u8]) -> Result<Digest> {
        validate_repository(repository)?;
        let digest = Digest::of_bytes(data);
        let path = self.manifest_path(repository, &digest);
        if !path.exists() {
            write_atomic(&path, data).await?;
        }
        tracing::debug!(
            repository = %repository,
            digest = %digest,
            size = data.len(),
            "[RegistryStore] Manifest stored"
        );
        Ok(digest)
    }

    pub async fn read_manifest(&self, repository: &str, digest: &Digest) -> Result<Vec<u8>> {
        fs::read(self.manifest_path(repository, digest))
            .await
            .map_err(|_| RegistryError::NotFound(format!("manifest {}@{}", repository, digest)))
    }

    pub async fn delete_manifest(&self, repository: &str, digest: &Digest) -> Result<()> {
        let path = self.manifest_path(repository, digest);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    /// All manifest digests stored for a repository.
    pub async fn list_manifests(&self, repository: &str) -> Result<Vec<Digest>> {
        let dir = self.manifests_dir.join(repository).join("sha256");
        let mut digests = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(digests),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(hex) = name.strip_suffix(".json") {
                if let Ok(digest) = Digest::parse(&format!("sha256:{}", hex)) {
                    digests.push(digest);
                }
            }
        }
        Ok(digests)
    }

    // ---- tags ----

    /// Resolve a tag to the digest it points at.
    pub async fn resolve_tag(&self, repository: &str, tag: &str) -> Result<Option<Digest>> {
        let path = self.tag_path(repository, tag);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(Digest::parse(content.trim())?))
    }

    /// Point a tag at a manifest digest.
    ///
    /// Moving tags are last-writer-wins. Build tags (`b-<hex12>`) are
    /// immutable: re-pointing one at different content is an error;
    /// re-pointing at the same content is a no-op.
    pub async fn set_tag(&self, repository: &str, tag: &str, digest: &Digest) -> Result<()> {
        validate_repository(repository)?;
        validate_tag(tag)?;

        if is_build_tag(tag) {
            if let Some(existing) = self.resolve_tag(repository, tag).await? {
                if existing != *digest {
                    return Err(RegistryError::ImmutableTag(format!(
                        "{}:{} already points at {}",
                        repository, tag, existing
                    )));
                }
                return Ok(());
            }
        }

        let path = self.tag_path(repository, tag);
        write_atomic(&path, digest.as_str().as_bytes()).await?;

        tracing::debug!(
            repository = %repository,
            tag = %tag,
            digest = %digest,
            "[RegistryStore] Tag updated"
        );
        Ok(())
    }

    pub async fn delete_tag(&self, repository: &str, tag: &str) -> Result<()> {
        let path = self.tag_path(repository, tag);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let dir = self.manifests_dir.join(repository).join("tags");
        let mut tags = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(tags),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(tag) = name.strip_suffix(".digest") {
                tags.push(tag.to_string());
            }
        }
        tags.sort();
        Ok(tags)
    }
}

/// True for immutable per-build tags: `b-` followed by 12 hex characters.
pub fn is_build_tag(tag: &str) -> bool {
    match tag.strip_prefix(BUILD_TAG_PREFIX) {
        Some(rest) => {
            rest.len() == 12 && rest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        }
        None => false,
    }
}

/// Repository names: slash-separated segments of [a-z0-9._-], no empty
/// segments. Keeps paths inside the store root.
pub fn validate_repository(repository: &str) -> Result<()> {
    let valid = !repository.is_empty()
        && !repository.starts_with('/')
        && !repository.ends_with('/')
        && repository.split('/').all(|segment| {
            !segment.is_empty()
                && segment != ".."
                && segment
                    .bytes()
                    .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-'))
        });
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidReference(format!(
            "invalid repository name: {}",
            repository
        )))
    }
}

fn validate_tag(tag: &str) -> Result<()> {
    let valid = !tag.is_empty()
        && tag.len() <= 128
        && tag
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidReference(format!("invalid tag: {}", tag)))
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Atomic write: temp file in the target directory, sync, rename, sync dir.
/// Temp names are unique per write so concurrent writers of the same
/// content never rename each other's file away.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension(format!(
        "tmp.{}",
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&temp_path, data).await?;
    if let Ok(file) = fs::File::open(&temp_path).await {
        let _ = file.sync_all().await;
    }
    fs::rename(&temp_path, path).await?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent).await {
            let _ = dir.sync_all().await;
        }
    }
    Ok(())
}
