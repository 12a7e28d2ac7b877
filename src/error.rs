//! Custom error types for the crate.
//!
//! `RunError` is the single error enum surfaced by the engine and the data
//! pipeline. Validation failures are reported synchronously by
//! [`RunEngine::start`](crate::experiment::RunEngine::start), before any side
//! effect; every other failure is caught at the engine boundary, logged with
//! its trace, and converted into the run's terminal `Errored` state — raw
//! errors never escape to the presentation layer.
//!
//! Lifecycle code (the user's `setup`/`steps`/`cleanup`) returns
//! `anyhow::Result`; the engine wraps such failures into
//! [`RunError::Lifecycle`] with the phase that raised them.

use crate::experiment::state::Phase;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type RunResult<T> = std::result::Result<T, RunError>;

/// Errors produced by the run engine and the data pipeline.
#[derive(Error, Debug)]
pub enum RunError {
    /// A supplied parameter value failed descriptor validation. Reported
    /// before the run starts; no side effect has occurred.
    #[error("invalid value for field '{field}': {reason}")]
    Validation {
        /// Name of the offending field.
        field: String,
        /// Human-readable reason the value was rejected.
        reason: String,
    },

    /// A row emitted a column that was not declared by the experiment.
    #[error("row emitted undeclared column '{column}'")]
    Schema {
        /// The undeclared column name.
        column: String,
    },

    /// A lifecycle phase raised an error.
    #[error("{phase} phase failed: {source}")]
    Lifecycle {
        /// The phase that failed.
        phase: Phase,
        /// The underlying error, with its context chain.
        #[source]
        source: anyhow::Error,
    },

    /// The run was stopped by request. A controlled exit, not a failure.
    #[error("run cancelled by stop request")]
    Cancelled,

    /// The durable sink could not be created or written. Fatal to the run.
    #[error("persistence error: {0}")]
    Persistence(#[source] anyhow::Error),

    /// Settings could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    /// I/O error outside the persistence path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Check whether this error represents a controlled cancellation rather
    /// than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled)
    }
}
