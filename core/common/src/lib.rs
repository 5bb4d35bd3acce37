//! Common utilities and types shared across VitalSync modules.
//!
//! This module provides the record model and the error taxonomy that the
//! storage adapters and the sync core agree on.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{Category, OriginId, Record, TimeWindow};
