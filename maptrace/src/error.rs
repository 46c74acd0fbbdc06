//! Error types for the memory tracer

use std::path::PathBuf;
use thiserror::Error;

/// Tracer errors
#[derive(Error, Debug)]
pub enum TracerError {
    /// The trace (or debug mirror) file could not be created
    #[error("Failed to open trace output {path}: {source}")]
    OutputOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration could not be parsed
    #[error("Invalid tracer configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// Configuration file could not be read
    #[error("Failed to read configuration {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One or more records could not be written while tracing
    #[error("{failed} trace record(s) could not be written")]
    DroppedRecords {
        /// Number of failed record writes
        failed: u64,
    },

    /// Flushing or closing the output failed
    #[error("Failed to flush trace output: {0}")]
    Flush(#[source] std::io::Error),

    /// `finish` was called more than once
    #[error("Tracer already finished")]
    AlreadyFinished,

    /// The trace ends in the middle of a record
    #[error("Truncated trace record: {got} of {expected} bytes")]
    TruncatedRecord { got: usize, expected: usize },

    /// I/O error while reading a trace
    #[error("Failed to read trace: {0}")]
    Read(#[from] std::io::Error),
}
