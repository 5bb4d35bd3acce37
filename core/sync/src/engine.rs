//! Incremental sync engine: cursor-based delta reads per category.

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use vitalsync_common::{Category, Error, Result};
use vitalsync_storage::{ChangesPage, CursorStore, RecordStore, SyncCursor};

use crate::retry::ResilientExecutor;
use crate::state::{ChangesResult, SyncStatus};

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// A category whose last sync is older than this is reported stale.
    pub stale_after: Duration,
}

impl SyncConfig {
    /// Set the staleness threshold.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    fn stale_after_chrono(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.stale_after).unwrap_or_else(|_| ChronoDuration::weeks(5200))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Turns full-history reads into delta reads.
///
/// Per category the engine moves from *uninitialized* (no token) to
/// *tracking*: the first fetch only establishes a token and returns nothing,
/// later fetches return what changed since the previous one. Tokens are
/// persisted through the injected [`CursorStore`] and never leave the engine.
///
/// The cursor is saved only after the remote read succeeded, so a failed or
/// interrupted fetch simply repeats the same delta window next time.
pub struct IncrementalSync<P: RecordStore + ?Sized> {
    /// Remote store.
    store: Arc<P>,
    /// Cursor persistence.
    cursors: Arc<dyn CursorStore>,
    /// Shared quota-aware executor.
    executor: Arc<ResilientExecutor>,
    /// Configuration.
    config: SyncConfig,
}

impl<P: RecordStore + ?Sized> IncrementalSync<P> {
    /// Create a new sync engine.
    pub fn new(
        store: Arc<P>,
        cursors: Arc<dyn CursorStore>,
        executor: Arc<ResilientExecutor>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            cursors,
            executor,
            config,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Fetch changes for one category, reporting failure in the result.
    pub async fn fetch_changes(&self, category: &Category) -> ChangesResult {
        match self.try_fetch_changes(category).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Fetching changes for {} failed: {}", category, e);
                ChangesResult::failed(category.clone(), &e)
            }
        }
    }

    /// Fetch changes for one category, propagating failure.
    pub async fn try_fetch_changes(&self, category: &Category) -> Result<ChangesResult> {
        let mut cursor = self
            .cursors
            .load(category)
            .await?
            .unwrap_or_else(|| SyncCursor::uninitialized(category.clone()));

        let Some(token) = cursor.token.clone() else {
            return self.establish(cursor).await;
        };

        let page = match self.read_changes(category, Some(&token)).await {
            Ok(page) => page,
            Err(Error::CursorExpired(msg)) => {
                warn!(
                    "Change token for {} expired ({}); starting over with a fresh token",
                    category, msg
                );
                self.cursors.delete(category).await?;
                return self
                    .establish(SyncCursor::uninitialized(category.clone()))
                    .await;
            }
            Err(e) => return Err(e),
        };

        let ChangesPage {
            records,
            next_token,
        } = page;

        cursor.advance(next_token, records.len(), Utc::now());
        self.cursors.save(&cursor).await?;

        debug!("Fetched {} changed records for {}", records.len(), category);
        Ok(ChangesResult::delta(category.clone(), records))
    }

    /// Fetch several categories; each succeeds or fails on its own.
    pub async fn fetch_changes_for_types(
        &self,
        categories: &[Category],
    ) -> BTreeMap<Category, ChangesResult> {
        let mut results = BTreeMap::new();
        for category in categories {
            let result = self.fetch_changes(category).await;
            results.insert(category.clone(), result);
        }

        let failed = results.values().filter(|r| !r.is_ok()).count();
        info!(
            "Fetched changes for {} categories ({} failed)",
            results.len(),
            failed
        );
        results
    }

    /// Forget the cursor for `category`; the next fetch is an initial sync.
    pub async fn reset_sync(&self, category: &Category) -> Result<()> {
        info!("Resetting sync for {}", category);
        self.cursors.delete(category).await
    }

    /// Forget every cursor.
    pub async fn reset_all_syncs(&self) -> Result<()> {
        info!("Resetting sync for all categories");
        self.cursors.clear().await
    }

    /// Status of each requested category.
    pub async fn get_sync_status(
        &self,
        categories: &[Category],
    ) -> Result<BTreeMap<Category, SyncStatus>> {
        let now = Utc::now();
        let stale_after = self.config.stale_after_chrono();

        let mut statuses = BTreeMap::new();
        for category in categories {
            let cursor = self.cursors.load(category).await?;
            statuses.insert(
                category.clone(),
                SyncStatus::from_cursor(category, cursor.as_ref(), stale_after, now),
            );
        }
        Ok(statuses)
    }

    /// Obtain a first token without returning data.
    async fn establish(&self, mut cursor: SyncCursor) -> Result<ChangesResult> {
        let page = self.read_changes(&cursor.category, None).await?;
        if !page.records.is_empty() {
            debug!(
                "Discarding {} records returned with initial token for {}",
                page.records.len(),
                cursor.category
            );
        }

        cursor.advance(page.next_token, 0, Utc::now());
        self.cursors.save(&cursor).await?;

        info!("Initial sync established for {}", cursor.category);
        Ok(ChangesResult::initial(cursor.category))
    }

    async fn read_changes(&self, category: &Category, token: Option<&str>) -> Result<ChangesPage> {
        self.executor
            .execute(|| self.store.read_changes(category, token))
            .await
    }
}
