//! Sync cursor model and persistence trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

use vitalsync_common::{Category, Error, Result};

/// How far a category has been incrementally read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub category: Category,
    /// Opaque store token. `None` means never synced.
    pub token: Option<String>,
    /// Time of the last successful fetch.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Number of records returned by the last successful fetch.
    pub last_delta_size: Option<usize>,
    /// Successful fetches since the cursor was created.
    #[serde(default)]
    pub total_syncs: u64,
    /// Records returned across all successful fetches.
    #[serde(default)]
    pub total_records_fetched: u64,
}

impl SyncCursor {
    /// Cursor for a category that has never been synced.
    pub fn uninitialized(category: Category) -> Self {
        Self {
            category,
            token: None,
            last_synced_at: None,
            last_delta_size: None,
            total_syncs: 0,
            total_records_fetched: 0,
        }
    }

    /// Whether a token has ever been established.
    pub fn has_synced(&self) -> bool {
        self.token.is_some()
    }

    /// Move the cursor forward after a successful fetch.
    pub fn advance(&mut self, next_token: String, delta_size: usize, at: DateTime<Utc>) {
        self.token = Some(next_token);
        self.last_synced_at = Some(at);
        self.last_delta_size = Some(delta_size);
        self.total_syncs += 1;
        self.total_records_fetched += delta_size as u64;
    }
}

/// Key-value persistence for sync cursors, keyed by category.
///
/// Implementations must survive process restarts when used in production;
/// [`MemoryCursorStore`] is the exception, intended for tests.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the cursor for `category`, if one was saved.
    async fn load(&self, category: &Category) -> Result<Option<SyncCursor>>;

    /// Insert or replace the cursor for `cursor.category`.
    async fn save(&self, cursor: &SyncCursor) -> Result<()>;

    /// Remove the cursor for `category`. Missing entries are not an error.
    async fn delete(&self, category: &Category) -> Result<()>;

    /// Remove every cursor.
    async fn clear(&self) -> Result<()>;

    /// All saved cursors, ordered by category.
    async fn list(&self) -> Result<Vec<SyncCursor>>;
}

/// In-memory cursor store for testing.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: RwLock<BTreeMap<Category, SyncCursor>>,
}

impl MemoryCursorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> Error {
        Error::Storage("Cursor map lock poisoned".to_string())
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, category: &Category) -> Result<Option<SyncCursor>> {
        let cursors = self.cursors.read().map_err(|_| Self::poisoned())?;
        Ok(cursors.get(category).cloned())
    }

    async fn save(&self, cursor: &SyncCursor) -> Result<()> {
        let mut cursors = self.cursors.write().map_err(|_| Self::poisoned())?;
        cursors.insert(cursor.category.clone(), cursor.clone());
        Ok(())
    }

    async fn delete(&self, category: &Category) -> Result<()> {
        let mut cursors = self.cursors.write().map_err(|_| Self::poisoned())?;
        cursors.remove(category);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut cursors = self.cursors.write().map_err(|_| Self::poisoned())?;
        cursors.clear();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SyncCursor>> {
        let cursors = self.cursors.read().map_err(|_| Self::poisoned())?;
        Ok(cursors.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> Category {
        Category::new("steps").unwrap()
    }

    #[test]
    fn test_advance_updates_statistics() {
        let mut cursor = SyncCursor::uninitialized(steps());
        assert!(!cursor.has_synced());

        let now = Utc::now();
        cursor.advance("t1".to_string(), 0, now);
        cursor.advance("t2".to_string(), 12, now);

        assert!(cursor.has_synced());
        assert_eq!(cursor.token.as_deref(), Some("t2"));
        assert_eq!(cursor.last_delta_size, Some(12));
        assert_eq!(cursor.total_syncs, 2);
        assert_eq!(cursor.total_records_fetched, 12);
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryCursorStore::new();
        assert!(store.load(&steps()).await.unwrap().is_none());

        let mut cursor = SyncCursor::uninitialized(steps());
        cursor.advance("t1".to_string(), 3, Utc::now());
        store.save(&cursor).await.unwrap();

        assert_eq!(store.load(&steps()).await.unwrap(), Some(cursor));
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.delete(&steps()).await.unwrap();
        assert!(store.load(&steps()).await.unwrap().is_none());
        // Deleting again is fine
        store.delete(&steps()).await.unwrap();
    }
}
