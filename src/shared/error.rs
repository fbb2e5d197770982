use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The storage engine could not be brought up at all. Fatal at open;
    /// the host decides between a degraded (cache-disabled) mode and
    /// refusing to start.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage I/O failure: {0}")]
    StorageIo(String),

    /// Collections are fixed at open time; this name was not configured.
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote call failed: {0}")]
    RemoteCallFailed(String),

    #[error("Operation requires connectivity")]
    Offline,

    #[error("Mutation {id} permanently failed after {attempts} attempts")]
    PermanentMutationFailure { id: String, attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        CacheError::StorageIo(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
