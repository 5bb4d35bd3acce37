//! VitalSync Sync Core
//!
//! Quota-aware, resilient synchronization against a rate-limited health
//! record store:
//! - Quota tracking over an aligned hourly window
//! - Retry with exponential backoff under quota admission
//! - Chunked writes with per-chunk outcomes
//! - Incremental, cursor-based change reads
//! - Cross-writer conflict detection and reporting

pub mod batch;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod quota;
pub mod report;
pub mod retry;
pub mod state;

// Re-export main types
pub use batch::{
    BatchConfig, BatchOutcome, BatchProgress, BatchWriteResult, BatchWriter, GroupedWriteResult,
    WriteTotals,
};
pub use config::CoreConfig;
pub use conflict::{
    detect_conflicts, severity_score, ConflictConfig, ConflictDetectionResult, ConflictDetector,
    ConflictFinding, ConflictKind, ConflictSummary, Severity, SeverityWeights, SourceProfile,
};
pub use engine::{IncrementalSync, SyncConfig};
pub use quota::{QuotaConfig, QuotaStatus, QuotaTracker, QuotaWindow};
pub use report::{render_report, render_result};
pub use retry::{ResilientExecutor, RetryConfig};
pub use state::{ChangesResult, SyncStatus};
