use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot checksum mismatch for dataset {dataset_id}")]
    ChecksumMismatch { dataset_id: String },

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("core error: {0}")]
    Core(#[from] coframe_core::CoreError),
}
