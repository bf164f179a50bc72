//! Error types for unesm

use thiserror::Error;

/// Main error type for unesm operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated data at offset {offset}")]
    Truncated { offset: usize },

    #[error("bad magic: expected {expected}, found {found}")]
    BadMagic { expected: String, found: String },

    #[error("unsupported version {found} (expected {expected})")]
    UnsupportedVersion { expected: String, found: u32 },

    #[error("decompression failed: {0}")]
    DecompressFailed(String),

    #[error("entry not found: {0}")]
    EntryNotFound(String),

    #[error("string id 0x{0:08X} unresolved")]
    StringIdUnresolved(u32),

    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaMismatch { supported: i64, found: i64 },

    #[error("snapshot {0} not found")]
    SnapshotNotFound(i64),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    ConfigMissing(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Result type alias for unesm operations
pub type Result<T> = std::result::Result<T, Error>;
