use std::path::PathBuf;
use thiserror::Error;

use crate::model::{CollectionName, Id};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures reported by a document store backend
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached
    #[error("connection failed: {0}")]
    Connection(String),

    /// A unique index rejected the write
    #[error("duplicate key in '{collection}': {detail}")]
    DuplicateKey { collection: String, detail: String },

    /// The backend cannot express the requested index
    #[error("unsupported index {index}: {reason}")]
    UnsupportedIndex { index: String, reason: String },

    /// A document could not be converted to or from the backend's format
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Seeding errors
#[derive(Error, Debug)]
pub enum SeedError {
    /// Fixture input has the wrong shape; nothing was written
    #[error("malformed fixture at {location}: {reason}")]
    MalformedFixture { location: String, reason: String },

    /// Fixture file could not be read; nothing was written
    #[error("cannot read fixture {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A cross-collection reference points nowhere; nothing was written
    #[error(
        "dangling reference: {collection}/{document_id} field {field} points to missing {target_collection}/{target_id}"
    )]
    DanglingReference {
        collection: CollectionName,
        document_id: Id,
        field: String,
        target_collection: CollectionName,
        target_id: Id,
    },

    /// An index with the same keys already exists with other uniqueness
    #[error(
        "index conflict on {collection}.{index}: existing unique={existing_unique}, declared unique={declared_unique}"
    )]
    IndexConflict {
        collection: CollectionName,
        index: String,
        existing_unique: bool,
        declared_unique: bool,
    },

    /// The store failed while handling `target`
    #[error("store unavailable while writing {target}: {source}")]
    StoreUnavailable {
        target: String,
        #[source]
        source: StoreError,
    },
}

impl SeedError {
    pub fn malformed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        SeedError::MalformedFixture {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn store(target: impl Into<String>, source: StoreError) -> Self {
        SeedError::StoreUnavailable {
            target: target.into(),
            source,
        }
    }

    /// True for errors raised before the store was touched
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SeedError::MalformedFixture { .. } | SeedError::Io { .. } | SeedError::DanglingReference { .. }
        )
    }
}
