//! Log ingestion pipeline
//!
//! Reads update-server request logs as one logical stream, parses every line
//! into a [`RequestRecord`](crate::models::RequestRecord) and aggregates the
//! records into per-day statistics that are flushed to a
//! [`StatsStore`](crate::storage::StatsStore), one transaction per day.

pub mod engine;
pub mod locator;
pub mod parser;
pub mod stream;

pub use engine::{IngestSettings, IngestionEngine, ParseOutcome, StopReason};
pub use locator::find_first_entry_by_timestamp;
pub use parser::{LogRecordParser, OBFUSCATED_VERSION};
pub use stream::{order_by_first_timestamp, VirtualLogStream};

use crate::storage::StorageError;
use crate::summary::IndexError;
use thiserror::Error;

/// A single log line that could not be parsed. Never fatal on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to parse line #{line_number}: {reason}")]
pub struct ParseError {
    pub line_number: u64,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("too many consecutive bad lines ({count}) ending at line #{line_number}")]
    TooManyConsecutiveBadLines { line_number: u64, count: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StorageError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

pub type IngestResult<T> = Result<T, IngestError>;
