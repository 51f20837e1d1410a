use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::table::Table;

/// The published unit of collaboration: the origin table plus an optional
/// caller-owned metadata blob the engine never interprets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub table: Table,
    pub meta: Option<Vec<u8>>,
}

impl SnapshotDocument {
    pub fn new(table: Table) -> Self {
        Self { table, meta: None }
    }

    pub fn with_meta(table: Table, meta: Vec<u8>) -> Self {
        Self {
            table,
            meta: Some(meta),
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

/// Checksum over a document's msgpack encoding. Stores persist this beside
/// the document and verify it on load.
pub fn checksum(encoded: &[u8]) -> [u8; 32] {
    *blake3::hash(encoded).as_bytes()
}
