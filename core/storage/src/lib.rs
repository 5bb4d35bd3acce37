//! Storage capabilities consumed by the VitalSync core.
//!
//! This module defines the two seams the host application injects:
//! a [`RecordStore`] that moves records to and from the external health
//! store, and a [`CursorStore`] that persists incremental-sync cursors
//! across restarts.
//!
//! # Design Principles
//! - Transport isolation: no platform-specific logic leaks into the core
//! - Async operations: every remote or disk access is async
//! - Opaque cursors: change tokens are stored, never interpreted

pub mod cursor;
pub mod json;
pub mod memory;
pub mod provider;
pub mod sqlite;

pub use cursor::{CursorStore, MemoryCursorStore, SyncCursor};
pub use json::JsonCursorStore;
pub use memory::{MemoryRecordStore, ScriptedFailure};
pub use provider::{ChangesPage, RecordStore};
pub use sqlite::SqliteCursorStore;
