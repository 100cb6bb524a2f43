//! # Table
//!
//! Row-shaped inserts and scans over per-column page chains. Each
//! column of a table is a singly-linked chain of column data pages
//! rooted at the schema's `first_page_id`; a tuple is one value
//! appended to each column's tail page, and a scan reassembles tuples
//! by row id across the chains.
//!
//! ## Tail Cache and Row Count
//!
//! Opening a table walks every chain once: it caches the tail page of
//! each column (so inserts never re-walk the chain) and counts the
//! values in each column. Diverging per-column counts mean an earlier
//! insert died between columns; that table is refused at open rather
//! than silently scanned.
//!
//! ## Consistency Under Failure
//!
//! There is no write-ahead log. A mid-tuple failure (buffer pool
//! exhausted, I/O error) leaves earlier columns one value longer than
//! later ones; the handle marks itself damaged and refuses further
//! inserts so the divergence cannot grow.

use eyre::{bail, ensure, Result, WrapErr};
use smallvec::SmallVec;

use crate::schema::TableSchema;
use crate::storage::{BufferPool, ColumnPage, ColumnPageMut, PageId, INVALID_PAGE_ID};

#[derive(Debug)]
pub struct Table<'p> {
    schema: TableSchema,
    pool: &'p BufferPool,
    num_rows: u64,
    last_page_ids: SmallVec<[PageId; 8]>,
    damaged: bool,
}

impl<'p> Table<'p> {
    /// Opens a table from a schema snapshot, walking each column's
    /// chain to locate its tail page and to verify that all columns
    /// hold the same number of values.
    pub fn open(schema: TableSchema, pool: &'p BufferPool) -> Result<Self> {
        ensure!(
            !schema.columns().is_empty(),
            "table '{}' has no columns",
            schema.name()
        );

        let mut last_page_ids: SmallVec<[PageId; 8]> = SmallVec::new();
        let mut num_rows = None;

        for column in schema.columns() {
            ensure!(
                column.first_page_id() != INVALID_PAGE_ID,
                "column '{}' of table '{}' has no head page",
                column.name(),
                schema.name()
            );

            let (tail, count) = walk_chain(pool, column.first_page_id()).wrap_err_with(|| {
                format!(
                    "failed to walk column '{}' of table '{}'",
                    column.name(),
                    schema.name()
                )
            })?;
            last_page_ids.push(tail);

            match num_rows {
                None => num_rows = Some(count),
                Some(expected) => ensure!(
                    count == expected,
                    "column chains of table '{}' diverge: column '{}' holds {} values, expected {}",
                    schema.name(),
                    column.name(),
                    count,
                    expected
                ),
            }
        }

        Ok(Self {
            schema,
            pool,
            num_rows: num_rows.unwrap_or(0),
            last_page_ids,
            damaged: false,
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Appends one tuple, one value per column in schema order.
    pub fn insert(&mut self, tuple: &[i64]) -> Result<()> {
        ensure!(
            !self.damaged,
            "table '{}' refuses inserts: column chains diverged after a failed insert",
            self.schema.name()
        );
        ensure!(
            tuple.len() == self.schema.column_count(),
            "tuple has {} values but table '{}' has {} columns",
            tuple.len(),
            self.schema.name(),
            self.schema.column_count()
        );

        for (index, &value) in tuple.iter().enumerate() {
            if let Err(err) = self.append_value(index, value) {
                // Columns before `index` already took their value; the
                // chains no longer agree and cannot be repaired without
                // a log.
                if index > 0 {
                    self.damaged = true;
                }
                return Err(err.wrap_err(format!(
                    "failed to append to column '{}' of table '{}'",
                    self.schema.columns()[index].name(),
                    self.schema.name()
                )));
            }
        }

        self.num_rows += 1;
        Ok(())
    }

    fn append_value(&mut self, column_index: usize, value: i64) -> Result<()> {
        let mut guard = self.pool.fetch_write(self.last_page_ids[column_index])?;

        if ColumnPage::parse(guard.data())?.is_full() {
            let (new_page_id, mut new_guard) = self.pool.new_page()?;

            ColumnPageMut::parse(guard.data_mut())?.set_next_page_id(new_page_id);
            drop(guard);

            ColumnPageMut::init(new_guard.data_mut())?;
            self.last_page_ids[column_index] = new_page_id;
            guard = new_guard;
        }

        ColumnPageMut::parse(guard.data_mut())?.push(value)
    }

    /// Iterates over the rows present when the scan started, in
    /// insertion order. Rows inserted after the scan begins are not
    /// visited.
    pub fn scan(&self) -> TableScan<'_, 'p> {
        TableScan {
            table: self,
            row_id: 0,
            num_rows: self.num_rows,
        }
    }

    fn read_row(&self, row_id: u64) -> Result<Vec<i64>> {
        let mut tuple = Vec::with_capacity(self.schema.column_count());
        for column in self.schema.columns() {
            let value = self
                .read_value(column.first_page_id(), row_id)
                .wrap_err_with(|| {
                    format!(
                        "failed to read row {} of column '{}' in table '{}'",
                        row_id,
                        column.name(),
                        self.schema.name()
                    )
                })?;
            tuple.push(value);
        }
        Ok(tuple)
    }

    fn read_value(&self, first_page_id: PageId, row_id: u64) -> Result<i64> {
        let mut remaining = row_id;
        let mut current = first_page_id;

        while current != INVALID_PAGE_ID {
            let guard = self.pool.fetch_read(current)?;
            let page = ColumnPage::parse(guard.data())?;
            let count = u64::from(page.value_count());

            if remaining < count {
                return page
                    .value(remaining as u32)
                    .ok_or_else(|| eyre::eyre!("slot {remaining} vanished from page {current}"));
            }

            remaining -= count;
            current = page.next_page_id();
        }

        bail!("row {row_id} is beyond the end of the column chain");
    }
}

/// Scan over `[0, num_rows)` captured at creation. Each row re-walks
/// the column chains from their heads, latching one page at a time.
pub struct TableScan<'t, 'p> {
    table: &'t Table<'p>,
    row_id: u64,
    num_rows: u64,
}

impl Iterator for TableScan<'_, '_> {
    type Item = Result<Vec<i64>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.row_id >= self.num_rows {
            return None;
        }
        let row = self.table.read_row(self.row_id);
        self.row_id += 1;
        Some(row)
    }
}

fn walk_chain(pool: &BufferPool, first_page_id: PageId) -> Result<(PageId, u64)> {
    let mut current = first_page_id;
    let mut count = 0u64;

    loop {
        let guard = pool.fetch_read(current)?;
        let page = ColumnPage::parse(guard.data())?;
        count += u64::from(page.value_count());
        let next = page.next_page_id();
        drop(guard);

        if next == INVALID_PAGE_ID {
            return Ok((current, count));
        }
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_VALUES_PER_PAGE;
    use crate::schema::{Catalog, Column, DataType};
    use crate::storage::PageFile;
    use tempfile::{tempdir, TempDir};

    fn setup(pool_size: usize, columns: &[&str]) -> (TempDir, BufferPool, TableSchema) {
        let dir = tempdir().unwrap();
        let file = PageFile::open(dir.path().join("test.db")).unwrap();
        let is_new = file.is_new();
        let pool = BufferPool::new(file, pool_size).unwrap();

        let schema = {
            let mut catalog = Catalog::open(&pool, is_new).unwrap();
            catalog
                .create_table(TableSchema::new(
                    "t",
                    columns
                        .iter()
                        .map(|&name| Column::new(name, DataType::BigInt))
                        .collect(),
                ))
                .unwrap();
            catalog.table_schema("t").unwrap().clone()
        };

        (dir, pool, schema)
    }

    #[test]
    fn fresh_table_is_empty() {
        let (_dir, pool, schema) = setup(5, &["a", "b"]);
        let table = Table::open(schema, &pool).unwrap();

        assert_eq!(table.num_rows(), 0);
        assert_eq!(table.scan().count(), 0);
    }

    #[test]
    fn insert_and_scan_preserve_order() {
        let (_dir, pool, schema) = setup(5, &["id", "age"]);
        let mut table = Table::open(schema, &pool).unwrap();

        table.insert(&[101, 30]).unwrap();
        table.insert(&[102, 25]).unwrap();
        table.insert(&[103, 42]).unwrap();

        assert_eq!(table.num_rows(), 3);
        let rows: Vec<Vec<i64>> = table.scan().collect::<Result<_>>().unwrap();
        assert_eq!(rows, vec![vec![101, 30], vec![102, 25], vec![103, 42]]);
    }

    #[test]
    fn arity_mismatch_is_rejected_before_any_write() {
        let (_dir, pool, schema) = setup(5, &["a", "b"]);
        let mut table = Table::open(schema, &pool).unwrap();

        assert!(table.insert(&[1]).is_err());
        assert!(table.insert(&[1, 2, 3]).is_err());
        assert_eq!(table.num_rows(), 0);

        // The rejected tuples dirtied nothing.
        table.insert(&[1, 2]).unwrap();
        assert_eq!(table.num_rows(), 1);
    }

    #[test]
    fn full_page_grows_the_chain() {
        let (_dir, pool, schema) = setup(5, &["v"]);
        let mut table = Table::open(schema.clone(), &pool).unwrap();

        for i in 0..=MAX_VALUES_PER_PAGE as i64 {
            table.insert(&[i]).unwrap();
        }

        assert_eq!(table.num_rows(), MAX_VALUES_PER_PAGE as u64 + 1);

        // Head page is full and linked; the overflow value sits on the
        // successor.
        let head = pool.fetch_read(schema.columns()[0].first_page_id()).unwrap();
        let page = ColumnPage::parse(head.data()).unwrap();
        assert!(page.is_full());
        let next = page.next_page_id();
        assert_ne!(next, INVALID_PAGE_ID);
        drop(head);

        let tail = pool.fetch_read(next).unwrap();
        let page = ColumnPage::parse(tail.data()).unwrap();
        assert_eq!(page.value_count(), 1);
        assert_eq!(page.value(0), Some(MAX_VALUES_PER_PAGE as i64));
        drop(tail);

        let rows: Vec<Vec<i64>> = table.scan().collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), MAX_VALUES_PER_PAGE + 1);
        assert_eq!(rows[0], vec![0]);
        assert_eq!(rows[MAX_VALUES_PER_PAGE], vec![MAX_VALUES_PER_PAGE as i64]);
    }

    #[test]
    fn reopen_recounts_rows_and_finds_the_tail() {
        let (_dir, pool, schema) = setup(5, &["v"]);
        {
            let mut table = Table::open(schema.clone(), &pool).unwrap();
            for i in 0..700i64 {
                table.insert(&[i]).unwrap();
            }
        }

        let mut table = Table::open(schema, &pool).unwrap();
        assert_eq!(table.num_rows(), 700);

        // Appends continue on the existing tail page rather than
        // restarting the chain.
        table.insert(&[700]).unwrap();
        let rows: Vec<Vec<i64>> = table.scan().collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 701);
        assert_eq!(rows[700], vec![700]);
    }

    #[test]
    fn diverged_chains_are_refused_at_open() {
        let (_dir, pool, schema) = setup(5, &["a", "b"]);

        // Grow column a by one value behind the table's back.
        {
            let mut guard = pool
                .fetch_write(schema.columns()[0].first_page_id())
                .unwrap();
            ColumnPageMut::parse(guard.data_mut())
                .unwrap()
                .push(1)
                .unwrap();
        }

        let err = Table::open(schema, &pool).unwrap_err();
        assert!(err.to_string().contains("diverge"));
    }

    #[test]
    fn damaged_table_refuses_further_inserts() {
        let (_dir, pool, schema) = setup(5, &["a", "b"]);
        let mut table = Table::open(schema, &pool).unwrap();
        table.insert(&[1, 2]).unwrap();

        // A mid-tuple I/O failure flips this flag; from then on the
        // handle must refuse to widen the divergence.
        table.damaged = true;

        let err = table.insert(&[3, 4]).unwrap_err();
        assert!(err.to_string().contains("refuses inserts"));
        assert_eq!(table.num_rows(), 1);
    }
}
