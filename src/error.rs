// ⚠️ Error taxonomy
// Row-local errors are recovered per row; store, fetch and table errors abort the run.

use thiserror::Error;

/// Errors that invalidate a single row (or a single edge). The orchestrator
/// logs these and moves on to the next row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    /// Identifier derivation was handed an empty or blank seed
    #[error("invalid seed for {kind} identifier: {seed:?}")]
    InvalidSeed { kind: String, seed: String },

    /// The row has no usable `name` cell
    #[error("row has no usable '{column}' value")]
    MissingName { column: String },

    /// The tabular source could not decode the record at all
    #[error("malformed record: {reason}")]
    MalformedRecord { reason: String },

    /// A relationship endpoint key did not match any ingested entity
    #[error("unresolved {field} reference '{key}' for group '{group}'")]
    UnresolvedReference {
        group: String,
        field: String,
        key: String,
    },
}

/// Persistence failures. Never retried, never caught below the orchestrator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable during {operation} of '{id}': {source}")]
    Unavailable {
        operation: &'static str,
        id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("stored record '{id}' is unreadable: {reason}")]
    Corrupt { id: String, reason: String },
}

impl StoreError {
    pub fn unavailable<E>(operation: &'static str, id: &str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        StoreError::Unavailable {
            operation,
            id: id.to_string(),
            source: source.into(),
        }
    }
}

/// Run-level failures: anything that stops the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to fetch foundational record from {url}: {reason}")]
    FoundationalFetch { url: String, reason: String },

    #[error("table '{table}' is unavailable: {reason}")]
    TableUnavailable { table: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
