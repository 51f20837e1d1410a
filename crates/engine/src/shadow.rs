use std::collections::HashMap;

use coframe_core::{
    ids::AuthorId,
    record::{CellAddr, ChangeRecord},
    token::SequenceToken,
    value::CellValue,
};

/// Latest observed value of one cell from one author, with the token that
/// carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowCell {
    pub value: CellValue,
    pub token: SequenceToken,
}

/// One author's most recent write per cell.
#[derive(Debug, Clone, Default)]
pub struct ShadowTable {
    cells: HashMap<CellAddr, ShadowCell>,
}

impl ShadowTable {
    pub fn new() -> Self {
        Self {
            cells: HashMap::new(),
        }
    }

    /// Applies a record if it carries a greater token than what is already
    /// held for its cell. The keyed compare makes redelivery and reordering
    /// harmless: an equal or older token is a no-op.
    pub fn apply(&mut self, record: &ChangeRecord) -> bool {
        let addr = record.addr();
        match self.cells.get(&addr) {
            Some(existing) if existing.token >= record.token => false,
            _ => {
                self.cells.insert(
                    addr,
                    ShadowCell {
                        value: record.new_value.clone(),
                        token: record.token,
                    },
                );
                true
            }
        }
    }

    pub fn get(&self, addr: &CellAddr) -> Option<&ShadowCell> {
        self.cells.get(addr)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Per-author shadow tables for one dataset. Written only by the download
/// listener; readers clone the whole set for a consistent view.
#[derive(Debug, Clone)]
pub struct ShadowSet {
    tables: HashMap<AuthorId, ShadowTable>,
    max_authors: Option<usize>,
}

impl ShadowSet {
    pub fn new(max_authors: Option<usize>) -> Self {
        Self {
            tables: HashMap::new(),
            max_authors,
        }
    }

    /// Routes a record into its author's shadow table. Returns false when
    /// the record was stale or its author fell past the author bound.
    pub fn apply(&mut self, record: &ChangeRecord) -> bool {
        if !self.tables.contains_key(&record.author_id) {
            if let Some(max) = self.max_authors {
                if self.tables.len() >= max {
                    tracing::warn!(
                        "shadow set at author bound ({max}), dropping record from {}",
                        record.author_id
                    );
                    return false;
                }
            }
        }
        self.tables
            .entry(record.author_id.clone())
            .or_default()
            .apply(record)
    }

    pub fn authors(&self) -> impl Iterator<Item = &AuthorId> {
        self.tables.keys()
    }

    pub fn author_count(&self) -> usize {
        self.tables.len()
    }

    pub fn table(&self, author: &AuthorId) -> Option<&ShadowTable> {
        self.tables.get(author)
    }

    /// Every author's observation of one cell, ordered by author id so
    /// downstream consumers see a stable candidate order.
    pub fn cell_writes(&self, addr: &CellAddr) -> Vec<(&AuthorId, &ShadowCell)> {
        let mut writes: Vec<_> = self
            .tables
            .iter()
            .filter_map(|(author, table)| table.get(addr).map(|cell| (author, cell)))
            .collect();
        writes.sort_by(|a, b| a.0.cmp(b.0));
        writes
    }
}
