//! End-to-end tests driving the registry server through the client:
//! push/pull round trips, digest headers, auth and build-tag conflicts.

use registry::client::RegistryClient;
use registry::digest::Digest;
use registry::error::RegistryError;
use registry::manifest::{
    Descriptor, ImageManifest, CONFIG_MEDIA_TYPE, LAYER_MEDIA_TYPE,
};
use registry::server::start_server;
use registry::store::RegistryStore;
use std::sync::Arc;

async fn spawn_registry(auth_token: Option<String>) -> (RegistryClient, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RegistryStore::new(temp_dir.path().to_path_buf()).unwrap());
    let (addr, _handle) = start_server(store, "127.0.0.1", 0, auth_token.clone())
        .await
        .unwrap();
    let client = RegistryClient::new(&format!("http://{}", addr), auth_token).unwrap();
    (client, temp_dir)
}

fn sample_manifest(config: &[u8], layer: &[u8]) -> (ImageManifest, Vec<u8>) {
    let manifest = ImageManifest::new(
        Descriptor {
            media_type: CONFIG_MEDIA_TYPE.to_string(),
            digest: Digest::of_bytes(config),
            size: config.len() as u64,
        },
        vec![Descriptor {
            media_type: LAYER_MEDIA_TYPE.to_string(),
            digest: Digest::of_bytes(layer),
            size: layer.len() as u64,
        }],
    );
    let bytes = manifest.to_bytes().unwrap();
    (manifest, bytes)
}

#[tokio::test]
async fn test_ping() {
    let (client, _dir) = spawn_registry(None).await;
    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_push_and_pull_round_trip() {
    let (client, _dir) = spawn_registry(None).await;
    let repo = "todo/app";
    let config = br#"{"exposed_port":3000}"#.to_vec();
    let layer = b"layer tarball".to_vec();
    let (manifest, manifest_bytes) = sample_manifest(&config, &layer);

    // Push blobs then manifest
    client
        .put_blob(repo, &manifest.config.digest, config.clone())
        .await
        .unwrap();
    client
        .put_blob(repo, &manifest.layers[0].digest, layer.clone())
        .await
        .unwrap();
    let pushed = client
        .put_manifest(repo, "latest", manifest_bytes.clone())
        .await
        .unwrap();
    assert_eq!(pushed, Digest::of_bytes(&manifest_bytes));

    // HEAD resolves the tag to the same digest without a body
    let resolved = client.head_manifest(repo, "latest").await.unwrap();
    assert_eq!(resolved, pushed);

    // Pull by tag and by digest
    let (by_tag, tag_digest) = client.get_manifest(repo, "latest").await.unwrap();
    assert_eq!(by_tag, manifest_bytes);
    assert_eq!(tag_digest, pushed);
    let (by_digest, _) = client.get_manifest(repo, pushed.as_str()).await.unwrap();
    assert_eq!(by_digest, manifest_bytes);

    // Blobs round-trip with digest verification
    assert!(client.blob_exists(repo, &manifest.config.digest).await.unwrap());
    assert_eq!(
        client.get_blob(repo, &manifest.config.digest).await.unwrap(),
        config
    );
    assert_eq!(
        client.get_blob(repo, &manifest.layers[0].digest).await.unwrap(),
        layer
    );

    let tags = client.list_tags(repo).await.unwrap();
    assert_eq!(tags, vec!["latest".to_string()]);
}

#[tokio::test]
async fn test_unknown_tag_is_not_found() {
    let (client, _dir) = spawn_registry(None).await;
    match client.head_manifest("todo/app", "missing").await {
        Err(RegistryError::NotFound(_)) => {}
        other => panic!("Expected NotFound, got: {:?}", other),
    }
    match client.get_manifest("todo/app", "missing").await {
        Err(RegistryError::NotFound(_)) => {}
        other => panic!("Expected NotFound, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_blob_is_not_found() {
    let (client, _dir) = spawn_registry(None).await;
    let digest = Digest::of_bytes(b"never pushed");
    assert!(!client.blob_exists("todo/app", &digest).await.unwrap());
    match client.get_blob("todo/app", &digest).await {
        Err(RegistryError::NotFound(_)) => {}
        other => panic!("Expected NotFound, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_bearer_auth_is_enforced() {
    let (authed, _dir) = spawn_registry(Some("sekrit".to_string())).await;

    // Liveness stays open
    let anonymous = RegistryClient::new(authed.base_url(), None).unwrap();
    anonymous.ping().await.unwrap();

    // Content requests without the token are rejected
    match anonymous.head_manifest("todo/app", "latest").await {
        Err(RegistryError::Unauthorized(_)) => {}
        other => panic!("Expected Unauthorized, got: {:?}", other),
    }
    match anonymous
        .put_blob("todo/app", &Digest::of_bytes(b"x"), b"x".to_vec())
        .await
    {
        Err(RegistryError::Unauthorized(_)) => {}
        other => panic!("Expected Unauthorized, got: {:?}", other),
    }

    // With the token the same operations succeed
    authed
        .put_blob("todo/app", &Digest::of_bytes(b"x"), b"x".to_vec())
        .await
        .unwrap();

    let wrong = RegistryClient::new(authed.base_url(), Some("nope".to_string())).unwrap();
    match wrong.head_manifest("todo/app", "latest").await {
        Err(RegistryError::Unauthorized(_)) => {}
        other => panic!("Expected Unauthorized, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_build_tag_conflict_is_rejected() {
    let (client, _dir) = spawn_registry(None).await;
    let repo = "todo/app";
    let (_, first) = sample_manifest(b"config one", b"layer one");
    let (_, second) = sample_manifest(b"config two", b"layer two");

    let first_digest = Digest::of_bytes(&first);
    let build_tag = format!("b-{}", first_digest.short());

    client
        .put_manifest(repo, &build_tag, first.clone())
        .await
        .unwrap();
    // Re-pushing identical content is accepted
    client
        .put_manifest(repo, &build_tag, first.clone())
        .await
        .unwrap();

    match client.put_manifest(repo, &build_tag, second).await {
        Err(RegistryError::ImmutableTag(_)) => {}
        other => panic!("Expected ImmutableTag, got: {:?}", other),
    }

    // The original content still resolves
    let resolved = client.head_manifest(repo, &build_tag).await.unwrap();
    assert_eq!(resolved, first_digest);
}

#[tokio::test]
async fn test_blob_upload_digest_mismatch_is_rejected() {
    let (client, _dir) = spawn_registry(None).await;
    let wrong = Digest::of_bytes(b"claimed content");
    match client.put_blob("todo/app", &wrong, b"actual content".to_vec()).await {
        Err(RegistryError::Registry(msg)) => {
            assert!(msg.contains("400"), "unexpected message: {}", msg)
        }
        other => panic!("Expected Registry error, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_uploads_of_same_blob() {
    let (client, _dir) = spawn_registry(None).await;
    let data = b"shared layer".to_vec();
    let digest = Digest::of_bytes(&data);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let client = client.clone();
        let digest = digest.clone();
        let data = data.clone();
        handles.push(tokio::spawn(async move {
            client.put_blob("todo/app", &digest, data).await
        }));
    }
    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }
    assert_eq!(client.get_blob("todo/app", &digest).await.unwrap(), data);
}
