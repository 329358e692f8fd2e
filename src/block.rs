//! Data blocks: the unit of exchange of the native protocol.
//!
//! A block couples an info header, a list of column descriptors (name plus
//! type-specification string) and column-oriented data. All columns of a
//! block hold the same number of rows. Row-oriented input is transposed
//! into the column-oriented form before it is written.

use crate::error::{Error, Result};
use crate::value::Value;

/// Short metadata header preceding a block on newer server revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// Set for overflow blocks produced with `GROUP BY ... WITH TOTALS`.
    pub is_overflows: bool,
    /// Bucket number for two-level aggregation, `-1` when absent.
    pub bucket_num: i32,
}

impl Default for BlockInfo {
    fn default() -> Self {
        BlockInfo { is_overflows: false, bucket_num: -1 }
    }
}

/// A named, typed, column-oriented bundle of data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    /// The info header.
    pub info: BlockInfo,
    columns: Vec<(String, String)>,
    data: Vec<Vec<Value>>,
    rows: usize,
}

impl Block {
    /// An empty block: no columns, no rows. Serves as the end-of-data
    /// marker for INSERTs and external tables.
    pub fn new() -> Block {
        Block::default()
    }

    /// Build from column descriptors and column-oriented data.
    pub fn from_columns(
        columns: Vec<(String, String)>,
        data: Vec<Vec<Value>>,
    ) -> Result<Block> {
        if columns.len() != data.len() {
            return Err(Error::Protocol(format!(
                "{} column descriptors for {} data columns",
                columns.len(),
                data.len()
            )));
        }
        let rows = data.first().map(Vec::len).unwrap_or(0);
        for ((name, _), column) in columns.iter().zip(&data) {
            if column.len() != rows {
                return Err(Error::ColumnTypeMismatch(format!(
                    "column \"{name}\" has {} rows, expected {rows}",
                    column.len()
                )));
            }
        }
        Ok(Block { info: BlockInfo::default(), columns, data, rows })
    }

    /// Build from column descriptors and row-oriented data, transposing
    /// into the column-oriented form.
    pub fn from_rows(columns: Vec<(String, String)>, rows: Vec<Vec<Value>>) -> Result<Block> {
        let mut data: Vec<Vec<Value>> =
            columns.iter().map(|_| Vec::with_capacity(rows.len())).collect();
        for (index, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::ColumnTypeMismatch(format!(
                    "row {index} has {} values, expected {}",
                    row.len(),
                    columns.len()
                )));
            }
            for (column, value) in data.iter_mut().zip(row) {
                column.push(value);
            }
        }
        let rows = data.first().map(Vec::len).unwrap_or(0);
        Ok(Block { info: BlockInfo::default(), columns, data, rows })
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.rows
    }

    /// True when the block carries no rows and no columns.
    pub fn is_empty(&self) -> bool {
        self.rows == 0 && self.columns.is_empty()
    }

    /// The `(name, type specification)` descriptors.
    pub fn columns_with_types(&self) -> &[(String, String)] {
        &self.columns
    }

    /// Column-oriented data, parallel to the descriptors.
    pub fn columns_data(&self) -> &[Vec<Value>] {
        &self.data
    }

    /// Data of one column by index.
    pub fn column_data(&self, index: usize) -> Option<&[Value]> {
        self.data.get(index).map(Vec::as_slice)
    }

    /// Materialize row tuples by zipping the columns.
    pub fn rows(&self) -> Vec<Vec<Value>> {
        (0..self.rows)
            .map(|i| self.data.iter().map(|column| column[i].clone()).collect())
            .collect()
    }

    /// Consume the block, returning descriptors and columnar data.
    pub fn into_parts(self) -> (Vec<(String, String)>, Vec<Vec<Value>>) {
        (self.columns, self.data)
    }
}
