//! Error and Result types for Holt storage operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for Holt operations.
pub type Result<T> = std::result::Result<T, HoltError>;

/// The error type for shard storage and WAL operations.
#[derive(Debug, Error)]
pub enum HoltError {
    /// The underlying key-value store refused to open the shard directory.
    #[error("shard {shard_id} failed to open: {source}")]
    ShardOpenFailed {
        /// Shard that could not be opened.
        shard_id: u32,
        /// Error reported by the store.
        #[source]
        source: rocksdb::Error,
    },

    /// Operation attempted on a closed or dropped shard handle.
    #[error("shard {0} is closed")]
    ShardClosed(u32),

    /// A query referenced a column unknown in the series.
    #[error("no field {column} in series {series}")]
    FieldLookup {
        /// Series the lookup ran against.
        series: String,
        /// Column that could not be resolved.
        column: String,
    },

    /// A batch commit failed; the store is unchanged.
    #[error("write to shard {shard_id} failed: {reason}")]
    WriteFailed {
        /// Shard the write was addressed to.
        shard_id: u32,
        /// What went wrong.
        reason: String,
    },

    /// An on-disk key did not match any known layout.
    #[error("corrupt key: {0}")]
    CorruptKey(String),

    /// Stored data violated a structural invariant.
    #[error("corrupt store: {0}")]
    CorruptStore(String),

    /// The WAL file contains a partial or malformed record.
    #[error("corrupt log at offset {offset}: {reason}")]
    CorruptLog {
        /// Byte offset of the bad record.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A WAL append wrote fewer payload bytes than requested.
    #[error("short write: {written} of {expected} payload bytes")]
    ShortWrite {
        /// Bytes actually written.
        written: usize,
        /// Bytes that should have been written.
        expected: usize,
    },

    /// I/O failure while replaying the WAL.
    #[error("replay read failed: {0}")]
    ReplayReadFailed(#[source] io::Error),

    /// The shard directory could not be removed after close.
    #[error("failed to drop shard {shard_id}: {source}")]
    DropFailed {
        /// Shard whose directory removal failed.
        shard_id: u32,
        /// Error from the filesystem.
        #[source]
        source: io::Error,
    },

    /// A write request could not be serialized.
    #[error("request encode failed: {0}")]
    EncodeFailed(String),

    /// A write request payload could not be deserialized.
    #[error("request decode failed: {0}")]
    DecodeFailed(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An internal invariant was violated. This is a bug.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}
