use coframe_core::CoreError;
use coframe_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("quorum must be at least 1, got {0}")]
    InvalidQuorum(usize),

    #[error("session state lock poisoned")]
    LockPoisoned,

    #[error("background task panicked: {0}")]
    TaskPanicked(String),
}

/// Failures no amount of retrying will fix. Background tasks exit on these
/// instead of looping on them.
pub(crate) fn permanent_failure(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::Storage(
            StorageError::DatasetNotFound(_)
                | StorageError::Serialization(_)
                | StorageError::LockPoisoned
        ) | EngineError::Core(_)
            | EngineError::LockPoisoned
    )
}
