//! Image reference parsing.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::digest::Digest;
use crate::error::{RegistryError, Result};

/// Parsed image reference (e.g. "registry.local:5000/todo/app:latest" or
/// "todo/app@sha256:...").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    /// Registry host (extracted when the first path segment looks like a
    /// host: contains a dot or is "localhost", optionally with a port)
    pub registry: Option<String>,

    /// Repository name (without registry)
    pub name: String,

    /// Tag (defaults to "latest" when neither tag nor digest is given)
    pub tag: Option<String>,

    /// Pinned digest for `name@sha256:...` references
    pub digest: Option<Digest>,
}

impl ImageReference {
    /// Parse an image reference string.
    pub fn parse(reference: &str) -> Result<Self> {
        if reference.is_empty() {
            return Err(RegistryError::InvalidReference("empty reference".to_string()));
        }

        // Digest references pin content directly: name@sha256:<hex>
        if let Some((name_part, digest_part)) = reference.split_once('@') {
            let digest = Digest::parse(digest_part)?;
            let (registry, name) = split_registry(name_part);
            if name.is_empty() {
                return Err(RegistryError::InvalidReference(reference.to_string()));
            }
            return Ok(Self {
                registry,
                name,
                tag: None,
                digest: Some(digest),
            });
        }

        // rsplit so a registry port ("localhost:5000/app") is not taken for a tag
        let (name_part, tag) = match reference.rsplit_once(':') {
            Some((name_part, tag)) if !tag.contains('/') => (name_part, Some(tag.to_string())),
            _ => (reference, None),
        };

        let (registry, name) = split_registry(name_part);
        if name.is_empty() {
            return Err(RegistryError::InvalidReference(reference.to_string()));
        }

        Ok(Self {
            registry,
            name,
            tag: Some(tag.unwrap_or_else(|| "latest".to_string())),
            digest: None,
        })
    }

    /// Tag or digest, whichever identifies this reference.
    pub fn reference_part(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(d), _) => d.to_string(),
            (None, Some(t)) => t.clone(),
            (None, None) => "latest".to_string(),
        }
    }

    /// Same repository, different tag.
    pub fn with_tag(&self, tag: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            name: self.name.clone(),
            tag: Some(tag.to_string()),
            digest: None,
        }
    }

    /// Same repository, pinned to a digest.
    pub fn with_digest(&self, digest: Digest) -> Self {
        Self {
            registry: self.registry.clone(),
            name: self.name.clone(),
            tag: None,
            digest: Some(digest),
        }
    }
}

fn split_registry(name_part: &str) -> (Option<String>, String) {
    if let Some((head, rest)) = name_part.split_once('/') {
        let host = head.split(':').next().unwrap_or(head);
        if host.contains('.') || host == "localhost" {
            return (Some(head.to_string()), rest.to_string());
        }
    }
    (None, name_part.to_string())
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        f.write_str(&self.name)?;
        match (&self.digest, &self.tag) {
            (Some(d), _) => write!(f, "@{}", d),
            (None, Some(t)) => write!(f, ":{}", t),
            (None, None) => Ok(()),
        }
    }
}
