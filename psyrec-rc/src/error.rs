//! Reconciliation error types

use thiserror::Error;

/// Fatal reconciliation errors
///
/// Row-level problems never surface here: they become rejections or
/// ambiguity markers. These errors stop a batch.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Inconsistent crosswalk: primary code {primary} maps to both {first} and {second}")]
    CrosswalkConflict {
        primary: String,
        first: String,
        second: String,
    },

    #[error("Inconsistent crosswalk: secondary code {secondary} is claimed by both {first} and {second}")]
    CrosswalkCollision {
        secondary: String,
        first: String,
        second: String,
    },

    #[error("Malformed crosswalk line {line}: {detail}")]
    CrosswalkFormat { line: usize, detail: String },

    #[error("No crosswalk entry for subject {0}")]
    UnmappedSubject(String),

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("Batch cancelled after {completed} of {total} work units")]
    Cancelled { completed: usize, total: usize },

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] psyrec_common::Error),
}

pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;
