//! HTTP client for the registry API: digest resolution for the
//! supervisor's cheap polling (HEAD), pull for the image store, push for
//! the pipeline.

use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::digest::Digest;
use crate::error::{RegistryError, Result};
use crate::manifest::{ImageManifest, MANIFEST_ACCEPT_HEADER, MANIFEST_MEDIA_TYPE};
use crate::server::DOCKER_CONTENT_DIGEST;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct TagList {
    tags: Vec<String>,
}

impl RegistryClient {
    /// `base_url` is scheme://host:port, e.g. "http://localhost:5000".
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, url);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Liveness check against `/v2/`.
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .request(reqwest::Method::GET, format!("{}/v2/", self.base_url))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(RegistryError::Registry(format!(
                "registry ping failed: {}",
                response.status()
            )))
        }
    }

    /// Resolve a tag or digest to the current manifest digest without
    /// downloading the manifest body.
    pub async fn head_manifest(&self, repository: &str, reference: &str) -> Result<Digest> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.base_url, repository, reference
        );
        let response = self
            .request(reqwest::Method::HEAD, url)
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT_HEADER)
            .send()
            .await?;
        let status = response.status();
        match status {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(RegistryError::NotFound(format!(
                    "{}:{}",
                    repository, reference
                )))
            }
            StatusCode::UNAUTHORIZED => {
                return Err(RegistryError::Unauthorized(repository.to_string()))
            }
            other => {
                return Err(RegistryError::Registry(format!(
                    "HEAD manifest {}:{} returned {}",
                    repository, reference, other
                )))
            }
        }
        let digest = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                RegistryError::Registry(format!(
                    "missing {} header for {}:{}",
                    DOCKER_CONTENT_DIGEST, repository, reference
                ))
            })?;
        Digest::parse(digest)
    }

    /// Fetch manifest bytes plus their digest, verified against the body.
    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<(Vec<u8>, Digest)> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.base_url, repository, reference
        );
        let response = self
            .request(reqwest::Method::GET, url)
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT_HEADER)
            .send()
            .await?;
        let status = response.status();
        match status {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(RegistryError::NotFound(format!(
                    "{}:{}",
                    repository, reference
                )))
            }
            StatusCode::UNAUTHORIZED => {
                return Err(RegistryError::Unauthorized(repository.to_string()))
            }
            other => {
                return Err(RegistryError::Registry(format!(
                    "GET manifest {}:{} returned {}",
                    repository, reference, other
                )))
            }
        }
        let data = response.bytes().await?.to_vec();
        let digest = Digest::of_bytes(&data);
        if reference.starts_with("sha256:") {
            let requested = Digest::parse(reference)?;
            if requested != digest {
                return Err(RegistryError::DigestMismatch {
                    expected: requested.to_string(),
                    actual: digest.to_string(),
                });
            }
        }
        Ok((data, digest))
    }

    /// Fetch and parse a manifest document.
    pub async fn get_parsed_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<(ImageManifest, Digest)> {
        let (data, digest) = self.get_manifest(repository, reference).await?;
        Ok((ImageManifest::from_bytes(&data)?, digest))
    }

    /// Push manifest bytes under a tag; returns the digest the registry
    /// recorded.
    pub async fn put_manifest(
        &self,
        repository: &str,
        tag: &str,
        data: Vec<u8>,
    ) -> Result<Digest> {
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, repository, tag);
        let response = self
            .request(reqwest::Method::PUT, url)
            .header(reqwest::header::CONTENT_TYPE, MANIFEST_MEDIA_TYPE)
            .body(data)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::CREATED || status.is_success() {
            let digest = response
                .headers()
                .get(DOCKER_CONTENT_DIGEST)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| {
                    RegistryError::Registry(format!(
                        "missing {} header after push of {}:{}",
                        DOCKER_CONTENT_DIGEST, repository, tag
                    ))
                })?;
            return Digest::parse(digest);
        }
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => Err(RegistryError::Unauthorized(repository.to_string())),
            StatusCode::BAD_REQUEST if body.contains("immutable") => {
                Err(RegistryError::ImmutableTag(format!("{}:{}", repository, tag)))
            }
            other => Err(RegistryError::Registry(format!(
                "PUT manifest {}:{} returned {}: {}",
                repository, tag, other, body
            ))),
        }
    }

    pub async fn blob_exists(&self, repository: &str, digest: &Digest) -> Result<bool> {
        let url = format!("{}/v2/{}/blobs/{}", self.base_url, repository, digest);
        let response = self.request(reqwest::Method::HEAD, url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::UNAUTHORIZED => {
                Err(RegistryError::Unauthorized(repository.to_string()))
            }
            other => Err(RegistryError::Registry(format!(
                "HEAD blob {} returned {}",
                digest, other
            ))),
        }
    }

    /// Download a blob and verify its content against the digest.
    pub async fn get_blob(&self, repository: &str, digest: &Digest) -> Result<Vec<u8>> {
        let url = format!("{}/v2/{}/blobs/{}", self.base_url, repository, digest);
        let response = self.request(reqwest::Method::GET, url).send().await?;
        let status = response.status();
        match status {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(RegistryError::NotFound(format!("blob {}", digest)))
            }
            StatusCode::UNAUTHORIZED => {
                return Err(RegistryError::Unauthorized(repository.to_string()))
            }
            other => {
                return Err(RegistryError::Registry(format!(
                    "GET blob {} returned {}",
                    digest, other
                )))
            }
        }
        let data = response.bytes().await?.to_vec();
        let actual = Digest::of_bytes(&data);
        if actual != *digest {
            return Err(RegistryError::DigestMismatch {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(data)
    }

    /// Monolithic blob upload.
    pub async fn put_blob(&self, repository: &str, digest: &Digest, data: Vec<u8>) -> Result<()> {
        let url = format!("{}/v2/{}/blobs/uploads/", self.base_url, repository);
        let response = self
            .request(reqwest::Method::POST, url)
            .query(&[("digest", digest.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => Err(RegistryError::Unauthorized(repository.to_string())),
            other => Err(RegistryError::Registry(format!(
                "blob upload {} returned {}: {}",
                digest, other, body
            ))),
        }
    }

    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let url = format!("{}/v2/{}/tags/list", self.base_url, repository);
        let response = self.request(reqwest::Method::GET, url).send().await?;
        let status = response.status();
        match status {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => {
                return Err(RegistryError::Unauthorized(repository.to_string()))
            }
            other => {
                return Err(RegistryError::Registry(format!(
                    "tags/list for {} returned {}",
                    repository, other
                )))
            }
        }
        let list: TagList = response.json().await?;
        Ok(list.tags)
    }
}
