//! strata common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all strata components.

pub mod config;
pub mod error;
pub mod safebuf;
pub mod types;
pub mod value;

pub use config::{CheckpointIndexConfig, HistoryTreeConfig, SearchKey};
pub use error::{Result, StrataError};
pub use safebuf::{SafeReader, SafeWriter};
pub use types::{AttributeId, TimeRange, Timestamp, OPEN_END};
pub use value::Value;
