//! Results and status reported by the incremental sync engine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use vitalsync_common::{Category, Error, ErrorKind, Record};
use vitalsync_storage::SyncCursor;

/// Outcome of one `fetch_changes` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesResult {
    pub category: Category,
    /// Records changed since the previous fetch. Always empty on initial sync.
    pub records: Vec<Record>,
    /// True when this call established the cursor.
    pub is_initial_sync: bool,
    pub has_changes: bool,
    /// Failure message; the stored cursor was left untouched.
    pub error: Option<String>,
    #[serde(skip)]
    pub error_kind: Option<ErrorKind>,
}

impl ChangesResult {
    pub(crate) fn initial(category: Category) -> Self {
        Self {
            category,
            records: Vec::new(),
            is_initial_sync: true,
            has_changes: false,
            error: None,
            error_kind: None,
        }
    }

    pub(crate) fn delta(category: Category, records: Vec<Record>) -> Self {
        Self {
            category,
            has_changes: !records.is_empty(),
            records,
            is_initial_sync: false,
            error: None,
            error_kind: None,
        }
    }

    pub(crate) fn failed(category: Category, error: &Error) -> Self {
        Self {
            category,
            records: Vec::new(),
            is_initial_sync: false,
            has_changes: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }

    /// Whether the fetch completed.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Sync status for a single category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub category: Category,
    pub has_synced: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_delta_size: Option<usize>,
    /// Never synced, or last sync older than the staleness threshold.
    pub is_stale: bool,
    pub total_syncs: u64,
    pub total_records_fetched: u64,
}

impl SyncStatus {
    /// Derive status from a stored cursor (or its absence).
    pub fn from_cursor(
        category: &Category,
        cursor: Option<&SyncCursor>,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        match cursor {
            Some(c) if c.has_synced() => Self {
                category: category.clone(),
                has_synced: true,
                last_synced_at: c.last_synced_at,
                last_delta_size: c.last_delta_size,
                is_stale: c.last_synced_at.map_or(true, |t| now - t > stale_after),
                total_syncs: c.total_syncs,
                total_records_fetched: c.total_records_fetched,
            },
            _ => Self {
                category: category.clone(),
                has_synced: false,
                last_synced_at: None,
                last_delta_size: None,
                is_stale: true,
                total_syncs: 0,
                total_records_fetched: 0,
            },
        }
    }
}
