//! JSON file cursor store.
//!
//! Keeps every cursor in one pretty-printed JSON document. Writes go to a
//! sibling temp file first and are renamed into place, so a crash mid-write
//! leaves the previous document intact.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use vitalsync_common::{Category, Error, Result};

use crate::cursor::{CursorStore, SyncCursor};

/// Cursor store persisted to a JSON file.
pub struct JsonCursorStore {
    path: PathBuf,
    cursors: Mutex<BTreeMap<Category, SyncCursor>>,
}

impl JsonCursorStore {
    /// Open (or create on first save) the store at `path`.
    ///
    /// # Errors
    /// - I/O failure reading an existing file
    /// - Existing file is not a valid cursor document
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let cursors = if fs::try_exists(&path).await.map_err(Error::Io)? {
            let content = fs::read_to_string(&path).await.map_err(Error::Io)?;
            let list: Vec<SyncCursor> = serde_json::from_str(&content)?;
            debug!("Loaded {} sync cursors from {}", list.len(), path.display());
            list.into_iter().map(|c| (c.category.clone(), c)).collect()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            cursors: Mutex::new(cursors),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, cursors: &BTreeMap<Category, SyncCursor>) -> Result<()> {
        let list: Vec<&SyncCursor> = cursors.values().collect();
        let json = serde_json::to_string_pretty(&list)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(Error::Io)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await.map_err(Error::Io)?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            warn!("Failed to move cursor file into place: {}", e);
            return Err(Error::Io(e));
        }
        Ok(())
    }
}

#[async_trait]
impl CursorStore for JsonCursorStore {
    async fn load(&self, category: &Category) -> Result<Option<SyncCursor>> {
        Ok(self.cursors.lock().await.get(category).cloned())
    }

    async fn save(&self, cursor: &SyncCursor) -> Result<()> {
        let mut cursors = self.cursors.lock().await;
        let mut next = cursors.clone();
        next.insert(cursor.category.clone(), cursor.clone());
        self.persist(&next).await?;
        *cursors = next;
        Ok(())
    }

    async fn delete(&self, category: &Category) -> Result<()> {
        let mut cursors = self.cursors.lock().await;
        if !cursors.contains_key(category) {
            return Ok(());
        }
        let mut next = cursors.clone();
        next.remove(category);
        self.persist(&next).await?;
        *cursors = next;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut cursors = self.cursors.lock().await;
        self.persist(&BTreeMap::new()).await?;
        cursors.clear();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncCursor>> {
        Ok(self.cursors.lock().await.values().cloned().collect())
    }
}
