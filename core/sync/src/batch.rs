//! Chunked writes with per-chunk retry and aggregate outcomes.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vitalsync_common::{ErrorKind, Result};

use crate::retry::ResilientExecutor;

/// Configuration for the batch writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Records per remote write. Values below 1 are treated as 1.
    pub chunk_size: usize,
}

impl BatchConfig {
    /// Create a configuration with the given chunk size.
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Outcome of one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// 1-based sequence number.
    pub batch_number: usize,
    /// Index of the chunk's first record in the caller's list.
    pub first_record_index: usize,
    pub record_count: usize,
    pub succeeded: bool,
    /// Last error message when the chunk failed.
    pub error: Option<String>,
    #[serde(skip)]
    pub error_kind: Option<ErrorKind>,
}

impl BatchOutcome {
    /// Range of source records covered by this chunk.
    pub fn record_range(&self) -> Range<usize> {
        self.first_record_index..self.first_record_index + self.record_count
    }
}

/// Progress report delivered after each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub current_batch: usize,
    pub total_batches: usize,
    pub records_processed: usize,
    /// 0.0 ..= 100.0
    pub progress_percent: f64,
}

/// Record counts shared by single and grouped write results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteTotals {
    pub total_records: usize,
    pub successful_records: usize,
    pub failed_records: usize,
}

impl WriteTotals {
    /// No record failed (vacuously true for empty writes).
    pub fn is_full_success(&self) -> bool {
        self.failed_records == 0
    }

    /// Some records succeeded and some failed.
    pub fn is_partial_success(&self) -> bool {
        self.successful_records > 0 && self.failed_records > 0
    }

    /// Records were attempted and none succeeded.
    pub fn is_full_failure(&self) -> bool {
        self.successful_records == 0 && self.failed_records > 0
    }

    fn add(&mut self, other: &WriteTotals) {
        self.total_records += other.total_records;
        self.successful_records += other.successful_records;
        self.failed_records += other.failed_records;
    }
}

/// Result of a sequential chunked write.
///
/// Hosts should check [`is_cancelled`](Self::is_cancelled) first. A cancelled
/// write is never a full success, and the partial/full-failure checks only
/// look at submitted chunks. A write cancelled before its first chunk matches
/// none of the three classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchWriteResult {
    /// One entry per submitted chunk, in submission order.
    pub outcomes: Vec<BatchOutcome>,
    pub totals: WriteTotals,
    pub duration: Duration,
    /// Set when cancellation stopped the write before every chunk was submitted.
    pub cancelled: bool,
}

impl BatchWriteResult {
    fn empty() -> Self {
        Self {
            outcomes: Vec::new(),
            totals: WriteTotals::default(),
            duration: Duration::ZERO,
            cancelled: false,
        }
    }

    pub fn total_records(&self) -> usize {
        self.totals.total_records
    }

    pub fn successful_records(&self) -> usize {
        self.totals.successful_records
    }

    pub fn failed_records(&self) -> usize {
        self.totals.failed_records
    }

    /// Records never submitted because the write was cancelled.
    pub fn unsubmitted_records(&self) -> usize {
        self.totals.total_records - self.totals.successful_records - self.totals.failed_records
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_full_success(&self) -> bool {
        self.totals.is_full_success() && !self.cancelled
    }

    pub fn is_partial_success(&self) -> bool {
        self.totals.is_partial_success()
    }

    pub fn is_full_failure(&self) -> bool {
        self.totals.is_full_failure()
    }

    /// Chunks that exhausted their retries.
    pub fn failed_batches(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded)
    }

    /// Source index ranges that need to be resubmitted.
    pub fn failed_record_ranges(&self) -> Vec<Range<usize>> {
        self.failed_batches().map(BatchOutcome::record_range).collect()
    }
}

/// Result of a grouped (parallel) write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedWriteResult<K: Ord> {
    pub groups: BTreeMap<K, BatchWriteResult>,
    pub totals: WriteTotals,
    pub duration: Duration,
}

impl<K: Ord> GroupedWriteResult<K> {
    pub fn is_full_success(&self) -> bool {
        self.totals.is_full_success()
    }

    pub fn is_partial_success(&self) -> bool {
        self.totals.is_partial_success()
    }

    pub fn is_full_failure(&self) -> bool {
        self.totals.is_full_failure()
    }
}

/// Splits large writes into store-sized chunks.
pub struct BatchWriter {
    executor: Arc<ResilientExecutor>,
    config: BatchConfig,
}

impl BatchWriter {
    /// Create a writer driving chunks through `executor`.
    pub fn new(executor: Arc<ResilientExecutor>, config: BatchConfig) -> Self {
        Self { executor, config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Write `records` chunk by chunk, in order.
    pub async fn write<T, F, Fut>(&self, records: &[T], write_fn: F) -> BatchWriteResult
    where
        T: Clone,
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.run(records, write_fn, |_| {}, None).await
    }

    /// Like [`write`](Self::write), reporting progress after each chunk.
    pub async fn write_with_progress<T, F, Fut, P>(
        &self,
        records: &[T],
        write_fn: F,
        on_progress: P,
    ) -> BatchWriteResult
    where
        T: Clone,
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Result<()>>,
        P: FnMut(&BatchProgress),
    {
        self.run(records, write_fn, on_progress, None).await
    }

    /// Like [`write_with_progress`](Self::write_with_progress), stopping
    /// between chunks once `cancel` fires. A chunk already in flight runs to
    /// completion and is reported.
    pub async fn write_with_cancel<T, F, Fut, P>(
        &self,
        records: &[T],
        write_fn: F,
        on_progress: P,
        cancel: &CancellationToken,
    ) -> BatchWriteResult
    where
        T: Clone,
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Result<()>>,
        P: FnMut(&BatchProgress),
    {
        self.run(records, write_fn, on_progress, Some(cancel)).await
    }

    /// Group records by `key_fn` and write groups concurrently.
    ///
    /// Within a group chunks keep record order; interleaving across groups
    /// is unspecified.
    pub async fn write_grouped<T, K, KF, F, Fut>(
        &self,
        records: &[T],
        key_fn: KF,
        write_fn: F,
    ) -> GroupedWriteResult<K>
    where
        T: Clone,
        K: Ord + Clone,
        KF: Fn(&T) -> K,
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let start = Instant::now();

        let mut grouped: BTreeMap<K, Vec<T>> = BTreeMap::new();
        for record in records {
            grouped.entry(key_fn(record)).or_default().push(record.clone());
        }

        debug!("Writing {} records in {} groups", records.len(), grouped.len());

        let write_fn = &write_fn;
        let results = join_all(grouped.iter().map(|(key, group)| async move {
            let result = self.write(group, write_fn).await;
            (key.clone(), result)
        }))
        .await;

        let mut totals = WriteTotals::default();
        let mut groups = BTreeMap::new();
        for (key, result) in results {
            totals.add(&result.totals);
            groups.insert(key, result);
        }

        let duration = start.elapsed();
        info!(
            "Grouped write completed in {:?}: {} of {} records written",
            duration, totals.successful_records, totals.total_records
        );

        GroupedWriteResult {
            groups,
            totals,
            duration,
        }
    }

    async fn run<T, F, Fut, P>(
        &self,
        records: &[T],
        write_fn: F,
        mut on_progress: P,
        cancel: Option<&CancellationToken>,
    ) -> BatchWriteResult
    where
        T: Clone,
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Result<()>>,
        P: FnMut(&BatchProgress),
    {
        if records.is_empty() {
            return BatchWriteResult::empty();
        }

        let start = Instant::now();
        let chunk_size = self.config.effective_chunk_size();
        let total_batches = records.len().div_ceil(chunk_size);
        let mut result = BatchWriteResult::empty();
        result.totals.total_records = records.len();

        info!(
            "Writing {} records in {} batches of up to {}",
            records.len(),
            total_batches,
            chunk_size
        );

        let mut processed = 0;
        for (index, chunk) in records.chunks(chunk_size).enumerate() {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                warn!(
                    "Write cancelled after {} of {} batches",
                    index, total_batches
                );
                result.cancelled = true;
                break;
            }

            let batch_number = index + 1;
            let outcome = self
                .executor
                .execute(|| write_fn(chunk.to_vec()))
                .await;

            let (succeeded, error, error_kind) = match outcome {
                Ok(()) => {
                    debug!(
                        "Batch {}/{} written ({} records)",
                        batch_number,
                        total_batches,
                        chunk.len()
                    );
                    result.totals.successful_records += chunk.len();
                    (true, None, None)
                }
                Err(e) => {
                    warn!("Batch {}/{} failed: {}", batch_number, total_batches, e);
                    result.totals.failed_records += chunk.len();
                    (false, Some(e.to_string()), Some(e.kind()))
                }
            };

            result.outcomes.push(BatchOutcome {
                batch_number,
                first_record_index: processed,
                record_count: chunk.len(),
                succeeded,
                error,
                error_kind,
            });

            processed += chunk.len();
            on_progress(&BatchProgress {
                current_batch: batch_number,
                total_batches,
                records_processed: processed,
                progress_percent: processed as f64 * 100.0 / records.len() as f64,
            });
        }

        result.duration = start.elapsed();
        info!(
            "Write completed in {:?}: {} succeeded, {} failed",
            result.duration, result.totals.successful_records, result.totals.failed_records
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use vitalsync_common::Error;

    fn writer(chunk_size: usize) -> BatchWriter {
        let executor = ResilientExecutor::new(
            RetryConfig::new(2)
                .with_initial_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5)),
        );
        BatchWriter::new(Arc::new(executor), BatchConfig::new(chunk_size))
    }

    #[tokio::test]
    async fn test_empty_write() {
        let result = writer(10).write(&Vec::<u32>::new(), |_| async { Ok(()) }).await;
        assert!(result.outcomes.is_empty());
        assert!(result.is_full_success());
        assert!(!result.is_full_failure());
    }

    #[tokio::test]
    async fn test_chunk_counts() {
        let records: Vec<u32> = (0..25).collect();
        let result = writer(10).write(&records, |_| async { Ok(()) }).await;

        let counts: Vec<usize> = result.outcomes.iter().map(|o| o.record_count).collect();
        assert_eq!(counts, vec![10, 10, 5]);
        assert_eq!(result.outcomes[2].batch_number, 3);
        assert_eq!(result.outcomes[2].record_range(), 20..25);
    }

    #[tokio::test]
    async fn test_exact_chunk_is_one_batch() {
        let records: Vec<u32> = (0..10).collect();
        let result = writer(10).write(&records, |_| async { Ok(()) }).await;
        assert_eq!(result.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn test_chunks_submitted_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let records: Vec<u32> = (0..7).collect();

        let log = seen.clone();
        writer(3)
            .write(&records, move |chunk: Vec<u32>| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(chunk);
                    Ok(())
                }
            })
            .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]
        );
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_abort() {
        let records: Vec<u32> = (0..30).collect();
        let result = writer(10)
            .write(&records, |chunk: Vec<u32>| async move {
                if chunk[0] == 10 {
                    Err(Error::Validation("bad sample".to_string()))
                } else {
                    Ok(())
                }
            })
            .await;

        assert_eq!(result.outcomes.len(), 3);
        assert!(result.is_partial_success());
        assert_eq!(result.failed_records(), 10);
        assert_eq!(result.failed_record_ranges(), vec![10..20]);
        let failed = result.failed_batches().next().unwrap();
        assert_eq!(failed.error_kind, Some(ErrorKind::Permanent));
        assert!(failed.error.as_deref().unwrap().contains("bad sample"));
    }

    #[tokio::test]
    async fn test_transient_chunk_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let records: Vec<u32> = (0..5).collect();

        let result = writer(5)
            .write(&records, move |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(Error::Transient("reset".to_string()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_full_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_full_failure() {
        let records: Vec<u32> = (0..4).collect();
        let result = writer(2)
            .write(&records, |_| async { Err(Error::Permanent("denied".to_string())) })
            .await;
        assert!(result.is_full_failure());
        assert!(!result.is_partial_success());
    }

    #[tokio::test]
    async fn test_progress_reports() {
        let records: Vec<u32> = (0..5).collect();
        let mut reports = Vec::new();
        writer(2)
            .write_with_progress(&records, |_| async { Ok(()) }, |p| reports.push(*p))
            .await;

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].records_processed, 2);
        assert_eq!(reports[2].current_batch, 3);
        assert_eq!(reports[2].total_batches, 3);
        assert!((reports[2].progress_percent - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_cancel_between_chunks() {
        let records: Vec<u32> = (0..10).collect();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let result = writer(2)
            .write_with_cancel(
                &records,
                |_| async { Ok(()) },
                |p| {
                    if p.current_batch == 2 {
                        trigger.cancel();
                    }
                },
                &cancel,
            )
            .await;

        assert!(result.is_cancelled());
        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.successful_records(), 4);
        assert_eq!(result.unsubmitted_records(), 6);
        assert!(!result.is_full_success());
    }

    #[tokio::test]
    async fn test_cancel_before_first_chunk() {
        let records: Vec<u32> = (0..10).collect();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = writer(4)
            .write_with_cancel(&records, |_| async { Ok(()) }, |_| {}, &cancel)
            .await;

        assert!(result.is_cancelled());
        assert!(result.outcomes.is_empty());
        assert_eq!(result.unsubmitted_records(), 10);
        assert!(!result.is_full_success());
        assert!(!result.is_partial_success());
        assert!(!result.is_full_failure());
    }

    #[tokio::test]
    async fn test_grouped_write() {
        let records: Vec<(char, u32)> = vec![('a', 1), ('b', 2), ('a', 3), ('b', 4), ('c', 5)];
        let result = writer(1)
            .write_grouped(&records, |r| r.0, |chunk: Vec<(char, u32)>| async move {
                if chunk[0].0 == 'c' {
                    Err(Error::UnsupportedCategory("c".to_string()))
                } else {
                    Ok(())
                }
            })
            .await;

        assert_eq!(result.groups.len(), 3);
        assert_eq!(result.groups[&'a'].outcomes.len(), 2);
        assert_eq!(result.totals.total_records, 5);
        assert_eq!(result.totals.failed_records, 1);
        assert!(result.is_partial_success());
    }
}
