//! Record store trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vitalsync_common::{Category, Record, Result, TimeWindow};

/// One page of an incremental read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangesPage {
    /// Records inserted or updated since the supplied token.
    pub records: Vec<Record>,
    /// Token to present on the next read.
    pub next_token: String,
}

/// External health store as seen by the core.
///
/// Implementations wrap the platform transport. They must classify failures
/// with the common error taxonomy: [`vitalsync_common::Error::Throttled`] for
/// rate limiting, [`vitalsync_common::Error::Transient`] or
/// [`vitalsync_common::Error::Timeout`] for recoverable failures, and a
/// permanent variant for everything else.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get the store name (e.g., "memory", "health-connect").
    fn name(&self) -> &str;

    /// Insert records in a single remote write.
    ///
    /// # Preconditions
    /// - `records.len()` does not exceed the store's batch ceiling
    ///
    /// # Errors
    /// - Throttled when the remote quota is exhausted
    /// - Validation when the store rejects the payload
    async fn write(&self, records: Vec<Record>) -> Result<()>;

    /// Read changes for `category` since `token`.
    ///
    /// # Postconditions
    /// - With `token == None`, returns no records and a fresh token
    /// - Otherwise returns the delta since `token` and the next token
    ///
    /// # Errors
    /// - CursorExpired when the store no longer accepts `token`
    async fn read_changes(&self, category: &Category, token: Option<&str>) -> Result<ChangesPage>;

    /// Read every record of `category` intersecting `window`.
    async fn read_range(&self, category: &Category, window: &TimeWindow) -> Result<Vec<Record>>;
}
