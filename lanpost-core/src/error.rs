use thiserror::Error;

/// Errors produced by the KV-backed stores.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying file or device failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The database rejected a statement or stayed locked past the busy timeout.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored blob could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors writing a media payload to disk.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("payload is not valid base64: {0}")]
    InvalidPayload(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from contact directory operations.
#[derive(Error, Debug)]
pub enum ContactError {
    #[error("not an IPv4 address: {0:?}")]
    InvalidIp(String),

    #[error("contact name must not be empty")]
    EmptyName,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenience alias used by the store modules.
pub type Result<T> = std::result::Result<T, StoreError>;
