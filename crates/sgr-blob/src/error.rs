use std::path::PathBuf;

use sgr_store::StoreError;

use crate::reference::RefType;

/// Errors from blob storage operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// I/O error on a specific file.
    #[error("I/O error on {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error on a stream or buffer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No blob reference with this id exists in the group.
    #[error("no blob reference {id} in {group}")]
    NotFound { group: String, id: String },

    /// The backend has no file behind this link.
    #[error("blob file missing: {link}")]
    MissingFile { link: String },

    /// A reference names a backend that is not registered.
    #[error("no handler registered for {0} blob references")]
    UnsupportedBackend(RefType),

    /// A binary-reference block or reference document is malformed.
    #[error("corrupt blob reference in {context}: {reason}")]
    CorruptReference { context: String, reason: String },

    /// Stored bytes no longer match their recorded checksum.
    #[error("checksum mismatch for {id}: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        id: String,
        expected: String,
        computed: String,
    },

    /// A file write kept failing after every allowed attempt.
    #[error("writing {path} failed after {attempts} attempt(s): {reason}")]
    RetriesExhausted {
        path: PathBuf,
        attempts: u32,
        reason: String,
    },

    /// Compression or decompression failure.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Reference bookkeeping in the document database failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl BlobError {
    pub(crate) fn corrupt(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptReference {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for blob operations.
pub type BlobResult<T> = Result<T, BlobError>;
