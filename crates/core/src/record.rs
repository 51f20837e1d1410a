use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{AuthorId, DatasetId};
use crate::token::SequenceToken;
use crate::value::CellValue;

/// Cell address within a table's label space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellAddr {
    pub row: i64,
    pub column: String,
}

impl CellAddr {
    pub fn new(row: i64, column: impl Into<String>) -> Self {
        Self {
            row,
            column: column.into(),
        }
    }
}

impl fmt::Display for CellAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:?})", self.row, self.column)
    }
}

/// A local cell edit not yet sequenced by a store. The store assigns the
/// token at append time and returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    pub row: i64,
    pub column: String,
    pub author_id: AuthorId,
    pub new_value: CellValue,
}

impl CellWrite {
    pub fn new(
        row: i64,
        column: impl Into<String>,
        author_id: AuthorId,
        new_value: CellValue,
    ) -> Self {
        Self {
            row,
            column: column.into(),
            author_id,
            new_value,
        }
    }
}

/// One attributed, sequenced delta in a dataset's change feed. Immutable
/// once appended; the apply key is (dataset_id, row, column, author_id) and
/// the greatest token wins per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub dataset_id: DatasetId,
    pub row: i64,
    pub column: String,
    pub author_id: AuthorId,
    pub new_value: CellValue,
    pub token: SequenceToken,
}

impl ChangeRecord {
    pub fn from_write(dataset_id: DatasetId, write: CellWrite, token: SequenceToken) -> Self {
        Self {
            dataset_id,
            row: write.row,
            column: write.column,
            author_id: write.author_id,
            new_value: write.new_value,
            token,
        }
    }

    pub fn addr(&self) -> CellAddr {
        CellAddr::new(self.row, self.column.clone())
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

impl Ord for ChangeRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.token
            .cmp(&other.token)
            .then_with(|| self.author_id.cmp(&other.author_id))
            .then_with(|| self.row.cmp(&other.row))
            .then_with(|| self.column.cmp(&other.column))
    }
}

impl PartialOrd for ChangeRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
