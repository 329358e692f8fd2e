//! Result assembly: buffered results and streaming row iteration.

use std::collections::VecDeque;

use crate::block::Block;
use crate::connection::{Connection, Packet};
use crate::error::Result;
use crate::value::Value;

/// The buffered result of [`Connection::execute`].
///
/// Data is held column-oriented, exactly as the blocks arrived; both row
/// and columnar views are derived from it.
#[derive(Debug, Default)]
pub struct QueryResult {
    columns: Vec<(String, String)>,
    blocks: Vec<Block>,
    totals: Option<Block>,
    extremes: Option<Block>,
    multistring_message: Vec<String>,
}

impl QueryResult {
    pub(crate) fn add_block(&mut self, block: Block) {
        if block.n_rows() > 0 {
            self.blocks.push(block);
        } else if self.columns.is_empty() && block.n_columns() > 0 {
            // The header block carries no rows; pick descriptors from it.
            self.columns = block.columns_with_types().to_vec();
        }
    }

    pub(crate) fn set_totals(&mut self, block: Block) {
        self.totals = Some(block);
    }

    pub(crate) fn set_extremes(&mut self, block: Block) {
        self.extremes = Some(block);
    }

    pub(crate) fn set_multistring_message(&mut self, strings: Vec<String>) {
        self.multistring_message = strings;
    }

    /// Column descriptors: `(name, type specification)` pairs.
    pub fn columns_with_types(&self) -> &[(String, String)] {
        if self.columns.is_empty() {
            self.blocks
                .first()
                .map(|b| b.columns_with_types())
                .unwrap_or_default()
        } else {
            &self.columns
        }
    }

    /// Total number of rows across all blocks.
    pub fn n_rows(&self) -> usize {
        self.blocks.iter().map(Block::n_rows).sum()
    }

    /// Row-oriented view: a list of row tuples in arrival order.
    pub fn rows(&self) -> Vec<Vec<Value>> {
        let mut rows = Vec::with_capacity(self.n_rows());
        for block in &self.blocks {
            rows.extend(block.rows());
        }
        rows
    }

    /// Column-oriented view: one concatenated array per column.
    pub fn columns(&self) -> Vec<Vec<Value>> {
        let n_columns = self.columns_with_types().len();
        let mut columns = vec![Vec::with_capacity(self.n_rows()); n_columns];
        for block in &self.blocks {
            for (column, data) in columns.iter_mut().zip(block.columns_data()) {
                column.extend(data.iter().cloned());
            }
        }
        columns
    }

    /// Totals block from `WITH TOTALS` queries.
    pub fn totals(&self) -> Option<&Block> {
        self.totals.as_ref()
    }

    /// Extremes block, when the `extremes` setting is on.
    pub fn extremes(&self) -> Option<&Block> {
        self.extremes.as_ref()
    }

    /// Strings from a TABLE_COLUMNS packet, when the server sent one.
    pub fn multistring_message(&self) -> &[String] {
        &self.multistring_message
    }
}

/// The lazy result of [`Connection::execute_iter`]: rows become available
/// as DATA blocks arrive.
///
/// The stream borrows its connection; dropping it before the end of the
/// stream leaves the query marked in flight, and the next call on the
/// connection fails with a partially-consumed-query error.
pub struct RowStream<'a> {
    conn: &'a mut Connection,
    columns: Vec<(String, String)>,
    buffered: VecDeque<Vec<Value>>,
    done: bool,
}

impl<'a> RowStream<'a> {
    pub(crate) fn new(conn: &'a mut Connection) -> RowStream<'a> {
        RowStream { conn, columns: Vec::new(), buffered: VecDeque::new(), done: false }
    }

    /// Column descriptors, available once the first block (even an empty
    /// header block) has arrived.
    pub fn columns_with_types(&self) -> &[(String, String)] {
        &self.columns
    }

    /// The next row, or `None` at the end of the stream.
    pub async fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                return Ok(Some(row));
            }
            if self.done {
                return Ok(None);
            }
            match self.conn.receive_packet().await? {
                Packet::Data(block) => {
                    if self.columns.is_empty() && block.n_columns() > 0 {
                        self.columns = block.columns_with_types().to_vec();
                    }
                    self.buffered.extend(block.rows());
                }
                Packet::EndOfStream => self.done = true,
                _ => continue,
            }
        }
    }

    /// Drain the remaining rows into a vector.
    pub async fn collect_rows(mut self) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(rows: Vec<Vec<Value>>) -> Block {
        Block::from_rows(
            vec![("n".into(), "UInt8".into()), ("s".into(), "String".into())],
            rows,
        )
        .unwrap()
    }

    #[test]
    fn header_block_supplies_descriptors() {
        let mut result = QueryResult::default();
        result.add_block(block(vec![]));
        assert_eq!(result.n_rows(), 0);
        assert_eq!(result.columns_with_types().len(), 2);
        assert!(result.rows().is_empty());
    }

    #[test]
    fn rows_and_columns_agree_across_blocks() {
        let mut result = QueryResult::default();
        result.add_block(block(vec![
            vec![Value::UInt8(1), Value::String("a".into())],
            vec![Value::UInt8(2), Value::String("b".into())],
        ]));
        result.add_block(block(vec![vec![Value::UInt8(3), Value::String("c".into())]]));

        assert_eq!(result.n_rows(), 3);
        let rows = result.rows();
        assert_eq!(rows[2], vec![Value::UInt8(3), Value::String("c".into())]);

        let columns = result.columns();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0], vec![Value::UInt8(1), Value::UInt8(2), Value::UInt8(3)]);
    }
}
