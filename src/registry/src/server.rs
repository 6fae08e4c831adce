//! HTTP server speaking the distribution-API subset the pipeline and the
//! supervisor need: version check, manifest GET/HEAD/PUT, blob GET/HEAD,
//! monolithic blob upload and tag listing.
//!
//! Repository names contain slashes, so `/v2/*path` requests are parsed
//! manually instead of with per-segment extractors.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::digest::Digest;
use crate::error::{RegistryError, Result};
use crate::manifest::MANIFEST_MEDIA_TYPE;
use crate::store::RegistryStore;

const V2_PREFIX: &str = "/v2/";
const MANIFESTS_SUFFIX: &str = "/manifests/";
const BLOBS_SUFFIX: &str = "/blobs/";
const UPLOADS_SUFFIX: &str = "/blobs/uploads/";
const TAGS_SUFFIX: &str = "/tags/list";

/// Header carrying the canonical digest of a returned manifest or blob.
pub const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RegistryStore>,
    /// Static bearer token; when set, every /v2/*path request must carry it.
    pub auth_token: Option<String>,
}

#[derive(Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.auth_token else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

fn unauthorized_response() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer realm=\"registry\"")],
        "authentication required",
    )
        .into_response()
}

fn error_response(err: RegistryError) -> axum::response::Response {
    let status = match &err {
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::InvalidReference(_)
        | RegistryError::InvalidDigest(_)
        | RegistryError::DigestMismatch { .. }
        | RegistryError::ImmutableTag(_) => StatusCode::BAD_REQUEST,
        RegistryError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("[Registry] Request failed: {}", err);
    }
    (status, err.to_string()).into_response()
}

// Wrapper handlers parse multi-segment repository names out of the path;
// axum's :name extractor only matches single segments.
async fn get_v2_wrapper(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> axum::response::Response {
    if !authorized(&state, &headers) {
        return unauthorized_response();
    }
    let path = uri.path().to_string();
    tracing::debug!("[Registry] GET {}", path);

    if let Some(idx) = path.rfind(MANIFESTS_SUFFIX) {
        let name = path[V2_PREFIX.len()..idx].to_string();
        let reference = path[idx + MANIFESTS_SUFFIX.len()..].to_string();
        get_manifest(State(state), Path((name, reference)))
            .await
            .into_response()
    } else if let Some(idx) = path.rfind(BLOBS_SUFFIX) {
        let name = path[V2_PREFIX.len()..idx].to_string();
        let digest = path[idx + BLOBS_SUFFIX.len()..].to_string();
        get_blob(State(state), Path((name, digest)))
            .await
            .into_response()
    } else if let Some(name) = path
        .strip_suffix(TAGS_SUFFIX)
        .and_then(|p| p.strip_prefix(V2_PREFIX.trim_end_matches('/')))
        .map(|p| p.trim_start_matches('/'))
    {
        list_tags(State(state), Path(name.to_string()))
            .await
            .into_response()
    } else {
        (StatusCode::BAD_REQUEST, "Invalid v2 path").into_response()
    }
}

async fn head_v2_wrapper(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> axum::response::Response {
    if !authorized(&state, &headers) {
        return unauthorized_response();
    }
    let path = uri.path().to_string();
    tracing::debug!("[Registry] HEAD {}", path);

    if let Some(idx) = path.rfind(MANIFESTS_SUFFIX) {
        let name = path[V2_PREFIX.len()..idx].to_string();
        let reference = path[idx + MANIFESTS_SUFFIX.len()..].to_string();
        head_manifest(State(state), Path((name, reference)))
            .await
            .into_response()
    } else if let Some(idx) = path.rfind(BLOBS_SUFFIX) {
        let name = path[V2_PREFIX.len()..idx].to_string();
        let digest = path[idx + BLOBS_SUFFIX.len()..].to_string();
        head_blob(State(state), Path((name, digest)))
            .await
            .into_response()
    } else {
        (StatusCode::BAD_REQUEST, "Invalid v2 path").into_response()
    }
}

async fn put_v2_wrapper(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    if !authorized(&state, &headers) {
        return unauthorized_response();
    }
    let path = uri.path().to_string();
    tracing::debug!("[Registry] PUT {} ({} bytes)", path, body.len());

    if let Some(idx) = path.rfind(MANIFESTS_SUFFIX) {
        let name = path[V2_PREFIX.len()..idx].to_string();
        let reference = path[idx + MANIFESTS_SUFFIX.len()..].to_string();
        put_manifest(State(state), Path((name, reference)), body)
            .await
            .into_response()
    } else {
        (StatusCode::BAD_REQUEST, "Invalid v2 path").into_response()
    }
}

async fn post_v2_wrapper(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    if !authorized(&state, &headers) {
        return unauthorized_response();
    }
    let path = uri.path().to_string();
    tracing::debug!("[Registry] POST {} ({} bytes)", path, body.len());

    if let Some(idx) = path.rfind(UPLOADS_SUFFIX) {
        let name = path[V2_PREFIX.len()..idx].to_string();
        let digest = match digest_query_param(uri.query()) {
            Some(digest) => digest,
            None => {
                // Only monolithic uploads are supported
                return (
                    StatusCode::BAD_REQUEST,
                    "digest query parameter required",
                )
                    .into_response();
            }
        };
        upload_blob(State(state), Path((name, digest)), body)
            .await
            .into_response()
    } else {
        (StatusCode::BAD_REQUEST, "Invalid v2 path").into_response()
    }
}

fn digest_query_param(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("digest="))
        .map(|value| value.replace("%3A", ":").replace("%3a", ":"))
}

async fn get_manifest(
    State(state): State<AppState>,
    Path((name, reference)): Path<(String, String)>,
) -> axum::response::Response {
    let (data, digest) = match read_manifest(&state, &name, &reference).await {
        Ok(found) => found,
        Err(err) => return error_response(err),
    };
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), MANIFEST_MEDIA_TYPE.to_string()),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
        data,
    )
        .into_response()
}

async fn head_manifest(
    State(state): State<AppState>,
    Path((name, reference)): Path<(String, String)>,
) -> axum::response::Response {
    let (data, digest) = match read_manifest(&state, &name, &reference).await {
        Ok(found) => found,
        Err(err) => return error_response(err),
    };
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), MANIFEST_MEDIA_TYPE.to_string()),
            (header::CONTENT_LENGTH.as_str(), data.len().to_string()),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
    )
        .into_response()
}

/// Resolve a tag or digest reference to manifest bytes plus digest.
async fn read_manifest(
    state: &AppState,
    name: &str,
    reference: &str,
) -> Result<(Vec<u8>, Digest)> {
    let digest = if reference.starts_with("sha256:") {
        Digest::parse(reference)?
    } else {
        state
            .store
            .resolve_tag(name, reference)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("{}:{}", name, reference)))?
    };
    let data = state.store.read_manifest(name, &digest).await?;
    Ok((data, digest))
}

async fn put_manifest(
    State(state): State<AppState>,
    Path((name, reference)): Path<(String, String)>,
    body: Bytes,
) -> axum::response::Response {
    let result = async {
        let digest = state.store.put_manifest(&name, &body).await?;
        if reference.starts_with("sha256:") {
            let requested = Digest::parse(&reference)?;
            if requested != digest {
                return Err(RegistryError::DigestMismatch {
                    expected: requested.to_string(),
                    actual: digest.to_string(),
                });
            }
        } else {
            state.store.set_tag(&name, &reference, &digest).await?;
        }
        Ok(digest)
    }
    .await;

    match result {
        Ok(digest) => {
            tracing::info!(
                repository = %name,
                reference = %reference,
                digest = %digest,
                "[Registry] Manifest pushed"
            );
            (
                StatusCode::CREATED,
                [
                    (header::LOCATION.as_str(), format!("/v2/{}/manifests/{}", name, digest)),
                    (DOCKER_CONTENT_DIGEST, digest.to_string()),
                ],
            )
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn get_blob(
    State(state): State<AppState>,
    Path((name, digest)): Path<(String, String)>,
) -> axum::response::Response {
    let _ = name;
    let result = async {
        let digest = Digest::parse(&digest)?;
        let data = state.store.read_blob(&digest).await?;
        Ok((data, digest))
    }
    .await;

    match result {
        Ok((data, digest)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE.as_str(), "application/octet-stream".to_string()),
                (DOCKER_CONTENT_DIGEST, digest.to_string()),
            ],
            data,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

async fn head_blob(
    State(state): State<AppState>,
    Path((name, digest)): Path<(String, String)>,
) -> axum::response::Response {
    let _ = name;
    let parsed = match Digest::parse(&digest) {
        Ok(parsed) => parsed,
        Err(err) => return error_response(err),
    };
    match state.store.blob_size(&parsed).await {
        Some(size) => (
            StatusCode::OK,
            [
                (header::CONTENT_LENGTH.as_str(), size.to_string()),
                (DOCKER_CONTENT_DIGEST, parsed.to_string()),
            ],
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "blob unknown").into_response(),
    }
}

async fn upload_blob(
    State(state): State<AppState>,
    Path((name, digest)): Path<(String, String)>,
    body: Bytes,
) -> axum::response::Response {
    let result = async {
        let digest = Digest::parse(&digest)?;
        state.store.write_blob(&digest, &body).await?;
        Ok(digest)
    }
    .await;

    match result {
        Ok(digest) => {
            tracing::debug!(
                repository = %name,
                digest = %digest,
                size = body.len(),
                "[Registry] Blob uploaded"
            );
            (
                StatusCode::CREATED,
                [
                    (header::LOCATION.as_str(), format!("/v2/{}/blobs/{}", name, digest)),
                    (DOCKER_CONTENT_DIGEST, digest.to_string()),
                ],
            )
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn list_tags(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match state.store.list_tags(&name).await {
        Ok(tags) => Json(TagList { name, tags }).into_response(),
        Err(err) => error_response(err),
    }
}

async fn api_version() -> impl IntoResponse {
    (StatusCode::OK, "{}")
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v2/", get(api_version))
        .route(
            "/v2/*path",
            get(get_v2_wrapper)
                .head(head_v2_wrapper)
                .put(put_v2_wrapper)
                .post(post_v2_wrapper),
        )
        .with_state(state)
}

/// Bind and serve the registry. Returns the bound address (useful when the
/// requested port is 0) and the server task handle.
pub async fn start_server(
    store: Arc<RegistryStore>,
    bind_address: &str,
    port: u16,
    auth_token: Option<String>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let state = AppState { store, auth_token };
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", bind_address, port)).await?;
    let addr = listener.local_addr()?;
    tracing::info!("[Registry] Listening on {}", addr);

    let handle = tokio::spawn(async move {
        let app = build_router(state);
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("[Registry] Server error: {}", e);
        }
    });
    Ok((addr, handle))
}
