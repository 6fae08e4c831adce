//! Store properties, exercised against both implementations: create
//! yields exactly one retrievable item with completed=false, double
//! toggle restores the original value, delete removes the item and a
//! nonexistent id reports not-found. The file store additionally
//! persists across reopen.

use std::sync::Arc;
use uuid::Uuid;

use todoapp::{FileStore, MemoryStore, TodoError, TodoStore};

async fn stores() -> (Vec<(&'static str, Arc<dyn TodoStore>)>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let file_store = FileStore::open(&temp_dir.path().join("todos.json"))
        .await
        .unwrap();
    (
        vec![
            ("memory", Arc::new(MemoryStore::new()) as Arc<dyn TodoStore>),
            ("file", Arc::new(file_store)),
        ],
        temp_dir,
    )
}

#[tokio::test]
async fn test_create_yields_exactly_one_item_with_completed_false() {
    let (stores, _dir) = stores().await;
    for (kind, store) in stores {
        let created = store.create("buy milk").await.unwrap();
        assert!(!created.completed, "{}: completed should start false", kind);
        assert_eq!(created.text, "buy milk");

        let items = store.list().await.unwrap();
        assert_eq!(items.len(), 1, "{}: expected exactly one item", kind);
        assert_eq!(items[0], created);
    }
}

#[tokio::test]
async fn test_create_trims_and_rejects_empty_text() {
    let (stores, _dir) = stores().await;
    for (kind, store) in stores {
        for bad in ["", "   ", "\t\n"] {
            match store.create(bad).await {
                Err(TodoError::EmptyText) => {}
                other => panic!("{}: expected EmptyText, got {:?}", kind, other),
            }
        }
        assert!(store.list().await.unwrap().is_empty(), "{}: nothing should be created", kind);

        let created = store.create("  padded  ").await.unwrap();
        assert_eq!(created.text, "padded", "{}: text should be trimmed", kind);
    }
}

#[tokio::test]
async fn test_double_toggle_restores_original_value() {
    let (stores, _dir) = stores().await;
    for (kind, store) in stores {
        let created = store.create("toggle me").await.unwrap();

        let once = store.toggle(created.id).await.unwrap();
        assert!(once.completed, "{}: first toggle completes", kind);
        let twice = store.toggle(created.id).await.unwrap();
        assert_eq!(twice.completed, created.completed, "{}: double toggle restores", kind);
    }
}

#[tokio::test]
async fn test_delete_removes_item_and_unknown_id_is_not_found() {
    let (stores, _dir) = stores().await;
    for (kind, store) in stores {
        let keep = store.create("keep").await.unwrap();
        let gone = store.create("remove").await.unwrap();

        store.delete(gone.id).await.unwrap();
        let items = store.list().await.unwrap();
        assert_eq!(items.len(), 1, "{}: one item should remain", kind);
        assert_eq!(items[0].id, keep.id);

        // Deleting a nonexistent id reports not-found, never a crash
        let random = Uuid::new_v4();
        match store.delete(random).await {
            Err(TodoError::NotFound(id)) => assert_eq!(id, random),
            other => panic!("{}: expected NotFound, got {:?}", kind, other),
        }
        match store.toggle(random).await {
            Err(TodoError::NotFound(_)) => {}
            other => panic!("{}: expected NotFound, got {:?}", kind, other),
        }
    }
}

#[tokio::test]
async fn test_list_is_ordered_oldest_first() {
    let (stores, _dir) = stores().await;
    for (kind, store) in stores {
        let first = store.create("first").await.unwrap();
        let second = store.create("second").await.unwrap();
        let third = store.create("third").await.unwrap();

        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id], "{}", kind);
    }
}

#[tokio::test]
async fn test_file_store_persists_across_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("todos.json");

    let store = FileStore::open(&path).await.unwrap();
    let created = store.create("survive restarts").await.unwrap();
    store.toggle(created.id).await.unwrap();
    drop(store);

    let reopened = FileStore::open(&path).await.unwrap();
    let items = reopened.list().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, created.id);
    assert_eq!(items[0].text, "survive restarts");
    assert!(items[0].completed);
}

#[tokio::test]
async fn test_file_store_fails_descriptively_on_corrupt_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("todos.json");
    tokio::fs::write(&path, b"not json at all").await.unwrap();

    match FileStore::open(&path).await {
        Err(TodoError::Store(msg)) => {
            assert!(msg.contains("todos.json"), "unexpected message: {}", msg)
        }
        other => panic!("Expected Store error, got: {:?}", other.map(|_| ())),
    }
}
