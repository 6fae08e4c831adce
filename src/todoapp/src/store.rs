//! Todo persistence behind a trait: an in-memory store for tests and a
//! file-backed JSON store for the deployed application.
//!
//! Mutations serialize behind one async lock; reads clone a snapshot.
//! The file store persists after every mutation with an atomic
//! tmp+rename write and loads the full set at startup.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, TodoError};
use crate::model::TodoItem;

#[async_trait]
pub trait TodoStore: Send + Sync {
    /// All items, oldest first.
    async fn list(&self) -> Result<Vec<TodoItem>>;

    /// Create one item from non-empty text; completed starts false.
    async fn create(&self, text: &str) -> Result<TodoItem>;

    /// Flip the completion flag; unknown ids are a not-found error.
    async fn toggle(&self, id: Uuid) -> Result<TodoItem>;

    /// Remove an item; unknown ids are a not-found error, never a crash.
    async fn delete(&self, id: Uuid) -> Result<()>;
}

fn validate_text(text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(TodoError::EmptyText);
    }
    Ok(text.to_string())
}

fn sorted(mut items: Vec<TodoItem>) -> Vec<TodoItem> {
    items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    items
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<Vec<TodoItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TodoStore for MemoryStore {
    async fn list(&self) -> Result<Vec<TodoItem>> {
        Ok(sorted(self.items.lock().await.clone()))
    }

    async fn create(&self, text: &str) -> Result<TodoItem> {
        let item = TodoItem::new(validate_text(text)?);
        self.items.lock().await.push(item.clone());
        Ok(item)
    }

    async fn toggle(&self, id: Uuid) -> Result<TodoItem> {
        let mut items = self.items.lock().await;
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(TodoError::NotFound(id))?;
        item.completed = !item.completed;
        Ok(item.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            return Err(TodoError::NotFound(id));
        }
        Ok(())
    }
}

/// JSON-file-backed store. The whole item set lives in one document,
/// rewritten atomically on every mutation.
pub struct FileStore {
    path: PathBuf,
    items: Mutex<Vec<TodoItem>>,
}

impl FileStore {
    /// Open the store, loading existing items. A missing file means an
    /// empty store; an unparsable file is a fatal, descriptive error.
    pub async fn open(path: &Path) -> Result<Self> {
        let items = if path.exists() {
            let data = fs::read(path).await.map_err(|e| {
                TodoError::Store(format!("cannot read {}: {}", path.display(), e))
            })?;
            serde_json::from_slice(&data).map_err(|e| {
                TodoError::Store(format!("cannot parse {}: {}", path.display(), e))
            })?
        } else {
            Vec::new()
        };

        tracing::info!(
            path = %path.display(),
            items = items.len(),
            "[TodoStore] Store opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            items: Mutex::new(items),
        })
    }

    async fn persist(&self, items: &[TodoItem]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, serde_json::to_vec_pretty(items)?).await?;
        fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl TodoStore for FileStore {
    async fn list(&self) -> Result<Vec<TodoItem>> {
        Ok(sorted(self.items.lock().await.clone()))
    }

    async fn create(&self, text: &str) -> Result<TodoItem> {
        let item = TodoItem::new(validate_text(text)?);
        let mut items = self.items.lock().await;
        items.push(item.clone());
        self.persist(&items).await?;
        Ok(item)
    }

    async fn toggle(&self, id: Uuid) -> Result<TodoItem> {
        let mut items = self.items.lock().await;
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(TodoError::NotFound(id))?;
        item.completed = !item.completed;
        let updated = item.clone();
        self.persist(&items).await?;
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            return Err(TodoError::NotFound(id));
        }
        self.persist(&items).await?;
        Ok(())
    }
}
