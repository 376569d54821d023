//! Error handling for sfmload.
//!
//! This module provides:
//! - [`ImportError`]: The main error enum for all import operations
//! - [`Result`]: Crate-wide result alias
//!
//! The import driver is the single place that decides between
//! "roll back this record and continue" and "abort the batch"; every other
//! component just returns a typed error.

use std::io;

use thiserror::Error;

/// Main error type for sfmload operations.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Unknown marker: {0}")]
    UnknownMarker(String),

    #[error("No record marker configured")]
    NoRecordMarker,

    #[error("Object not found: {0}")]
    ObjectNotFound(u64),

    #[error("Possibility list not found: {0}")]
    ListNotFound(u64),

    #[error("List item creation failed in list {list}: {reason}")]
    ListInsertFailed { list: u64, reason: String },

    #[error("Field write rejected on object {object}, field {field}: {reason}")]
    FieldRejected {
        object: u64,
        field: u32,
        reason: String,
    },

    #[error("Encoding conversion failed for writing system '{ws}': {reason}")]
    Conversion { ws: String, reason: String },

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Import cancelled at record boundary")]
    Cancelled,
}

impl ImportError {
    /// True when the error aborts the whole batch rather than a single
    /// record (taxonomy class e: the store is gone, or the user cancelled).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::NoRecordMarker | Self::Cancelled
        )
    }
}

/// Result type alias for sfmload operations.
pub type Result<T> = std::result::Result<T, ImportError>;
