use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::value::CellValue;

/// A labeled 2D value table: rows carry stable integer labels (not
/// necessarily contiguous), columns carry stable names. Label sets are fixed
/// at construction; only cell values change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    rows: Vec<i64>,
    columns: Vec<String>,
    // Row-major, rows.len() * columns.len() entries.
    cells: Vec<CellValue>,
}

impl Table {
    /// Build an all-null table over the given label space.
    pub fn new(rows: Vec<i64>, columns: Vec<String>) -> Result<Self, CoreError> {
        check_labels(&rows, &columns)?;
        let cells = vec![CellValue::Null; rows.len() * columns.len()];
        Ok(Self {
            rows,
            columns,
            cells,
        })
    }

    /// Build a table from row-major cell values.
    pub fn with_cells(
        rows: Vec<i64>,
        columns: Vec<String>,
        cells: Vec<CellValue>,
    ) -> Result<Self, CoreError> {
        check_labels(&rows, &columns)?;
        if cells.len() != rows.len() * columns.len() {
            return Err(CoreError::InvalidData(format!(
                "expected {} cells for a {}x{} table, got {}",
                rows.len() * columns.len(),
                rows.len(),
                columns.len(),
                cells.len()
            )));
        }
        Ok(Self {
            rows,
            columns,
            cells,
        })
    }

    pub fn rows(&self) -> &[i64] {
        &self.rows
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn contains(&self, row: i64, column: &str) -> bool {
        self.row_pos(row).is_some() && self.col_pos(column).is_some()
    }

    pub fn get(&self, row: i64, column: &str) -> Result<&CellValue, CoreError> {
        let r = self.row_pos(row).ok_or(CoreError::UnknownRow(row))?;
        let c = self
            .col_pos(column)
            .ok_or_else(|| CoreError::UnknownColumn(column.to_string()))?;
        Ok(&self.cells[r * self.columns.len() + c])
    }

    pub fn set(&mut self, row: i64, column: &str, value: CellValue) -> Result<(), CoreError> {
        let r = self.row_pos(row).ok_or(CoreError::UnknownRow(row))?;
        let c = self
            .col_pos(column)
            .ok_or_else(|| CoreError::UnknownColumn(column.to_string()))?;
        self.cells[r * self.columns.len() + c] = value;
        Ok(())
    }

    /// Iterate every cell in row-then-column label order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &str, &CellValue)> + '_ {
        self.rows.iter().enumerate().flat_map(move |(r, row)| {
            self.columns.iter().enumerate().map(move |(c, column)| {
                (*row, column.as_str(), &self.cells[r * self.columns.len() + c])
            })
        })
    }

    fn row_pos(&self, row: i64) -> Option<usize> {
        self.rows.iter().position(|r| *r == row)
    }

    fn col_pos(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

fn check_labels(rows: &[i64], columns: &[String]) -> Result<(), CoreError> {
    let mut seen_rows = HashSet::new();
    for row in rows {
        if !seen_rows.insert(*row) {
            return Err(CoreError::InvalidData(format!("duplicate row label {row}")));
        }
    }
    let mut seen_cols = HashSet::new();
    for column in columns {
        if !seen_cols.insert(column.as_str()) {
            return Err(CoreError::InvalidData(format!(
                "duplicate column {column:?}"
            )));
        }
    }
    Ok(())
}
