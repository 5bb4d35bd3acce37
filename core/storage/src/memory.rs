//! In-memory record store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use vitalsync_common::{Category, Error, Record, Result, TimeWindow};

use crate::provider::{ChangesPage, RecordStore};

/// Failure injected into a scripted call.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedFailure {
    /// Rate limit with an optional retry hint.
    Throttled { retry_after: Option<Duration> },
    /// Recoverable server failure.
    Transient,
    /// Call timed out.
    Timeout,
    /// Non-retryable rejection.
    Permanent,
}

impl ScriptedFailure {
    fn into_error(self, call: &str) -> Error {
        match self {
            ScriptedFailure::Throttled { retry_after } => Error::Throttled {
                message: format!("{} rate limited", call),
                retry_after,
                reset_at: None,
            },
            ScriptedFailure::Transient => Error::Transient(format!("{} unavailable", call)),
            ScriptedFailure::Timeout => Error::Timeout(format!("{} timed out", call)),
            ScriptedFailure::Permanent => Error::Permanent(format!("{} rejected", call)),
        }
    }
}

#[derive(Default)]
struct Inner {
    /// Append-only change log; position + 1 is the change sequence number.
    log: Vec<Record>,
    /// Bumped by `expire_tokens`; tokens from older generations are rejected.
    generation: u64,
    write_calls: usize,
    read_calls: usize,
    write_script: HashMap<usize, ScriptedFailure>,
    read_script: HashMap<usize, ScriptedFailure>,
}

/// In-memory record store.
///
/// Useful for testing and development. Emulates the remote contract: a
/// per-write batch ceiling, opaque forward-only change tokens, and
/// scripted failures keyed by 1-based call number.
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
    max_batch_size: usize,
}

impl MemoryRecordStore {
    /// Create an empty store with the default 1000-record batch ceiling.
    pub fn new() -> Self {
        Self::with_max_batch_size(1000)
    }

    /// Create an empty store with a custom batch ceiling.
    pub fn with_max_batch_size(max_batch_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_batch_size: max_batch_size.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))
    }

    /// Deposit records as another writer would, bypassing scripts and limits.
    pub fn insert_external(&self, records: Vec<Record>) -> Result<()> {
        let mut inner = self.lock()?;
        inner.log.extend(records);
        Ok(())
    }

    /// Fail the `call_number`-th write call (1-based) with `failure`.
    pub fn script_write(&self, call_number: usize, failure: ScriptedFailure) -> Result<()> {
        self.lock()?.write_script.insert(call_number, failure);
        Ok(())
    }

    /// Fail the `call_number`-th read call (1-based, changes and ranges share a counter).
    pub fn script_read(&self, call_number: usize, failure: ScriptedFailure) -> Result<()> {
        self.lock()?.read_script.insert(call_number, failure);
        Ok(())
    }

    /// Invalidate every token handed out so far.
    pub fn expire_tokens(&self) -> Result<()> {
        self.lock()?.generation += 1;
        Ok(())
    }

    /// Number of write calls received, including failed ones.
    pub fn write_calls(&self) -> usize {
        self.lock().map(|i| i.write_calls).unwrap_or(0)
    }

    /// Number of read calls received, including failed ones.
    pub fn read_calls(&self) -> usize {
        self.lock().map(|i| i.read_calls).unwrap_or(0)
    }

    /// Total records held.
    pub fn len(&self) -> usize {
        self.lock().map(|i| i.log.len()).unwrap_or(0)
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make_token(generation: u64, position: usize) -> String {
        format!("g{}-p{}", generation, position)
    }

    fn parse_token(token: &str, generation: u64) -> Result<usize> {
        let expired = || Error::CursorExpired(format!("Unknown change token {}", token));
        let (gen_part, pos_part) = token.split_once('-').ok_or_else(expired)?;
        let token_gen: u64 = gen_part
            .strip_prefix('g')
            .and_then(|g| g.parse().ok())
            .ok_or_else(expired)?;
        let position: usize = pos_part
            .strip_prefix('p')
            .and_then(|p| p.parse().ok())
            .ok_or_else(expired)?;
        if token_gen != generation {
            return Err(expired());
        }
        Ok(position)
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, records: Vec<Record>) -> Result<()> {
        let mut inner = self.lock()?;
        inner.write_calls += 1;
        let call = inner.write_calls;

        if let Some(failure) = inner.write_script.remove(&call) {
            return Err(failure.into_error("write"));
        }

        if records.len() > self.max_batch_size {
            return Err(Error::Validation(format!(
                "Batch of {} exceeds limit of {}",
                records.len(),
                self.max_batch_size
            )));
        }

        for mut record in records {
            if record.id.is_empty() {
                record.id = Uuid::new_v4().to_string();
            }
            inner.log.push(record);
        }
        Ok(())
    }

    async fn read_changes(&self, category: &Category, token: Option<&str>) -> Result<ChangesPage> {
        let mut inner = self.lock()?;
        inner.read_calls += 1;
        let call = inner.read_calls;

        if let Some(failure) = inner.read_script.remove(&call) {
            return Err(failure.into_error("read_changes"));
        }

        let head = inner.log.len();
        let next_token = Self::make_token(inner.generation, head);

        let Some(token) = token else {
            return Ok(ChangesPage {
                records: Vec::new(),
                next_token,
            });
        };

        let position = Self::parse_token(token, inner.generation)?;
        if position > head {
            return Err(Error::CursorExpired(format!("Token {} is ahead of the log", token)));
        }

        let records = inner.log[position..]
            .iter()
            .filter(|r| &r.category == category)
            .cloned()
            .collect();

        Ok(ChangesPage {
            records,
            next_token,
        })
    }

    async fn read_range(&self, category: &Category, window: &TimeWindow) -> Result<Vec<Record>> {
        let mut inner = self.lock()?;
        inner.read_calls += 1;
        let call = inner.read_calls;

        if let Some(failure) = inner.read_script.remove(&call) {
            return Err(failure.into_error("read_range"));
        }

        Ok(inner
            .log
            .iter()
            .filter(|r| &r.category == category && window.intersects(r.start, r.effective_end()))
            .cloned()
            .collect())
    }
}
