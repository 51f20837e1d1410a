use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("token drift too large: remote is {delta_ms}ms ahead (max {max_ms}ms)")]
    TokenDriftTooLarge { delta_ms: u64, max_ms: u64 },

    #[error("unknown row label {0}")]
    UnknownRow(i64),

    #[error("unknown column {0:?}")]
    UnknownColumn(String),

    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}
