//! # Catalog
//!
//! The catalog holds every table schema in memory and mirrors the map
//! onto page 0 after each change.

use std::collections::BTreeMap;

use eyre::{ensure, Result, WrapErr};

use crate::config::{MAX_NAME_LEN, PAGE_SIZE};
use crate::storage::{BufferPool, ColumnPageMut, PageId};

use super::persistence::CatalogPage;
use super::TableSchema;

/// Page 0 is reserved for the catalog at file-initialization time.
pub const CATALOG_PAGE_ID: PageId = 0;

#[derive(Debug)]
pub struct Catalog<'p> {
    pool: &'p BufferPool,
    schemas: BTreeMap<String, TableSchema>,
}

impl<'p> Catalog<'p> {
    /// Opens the catalog. A new database gets an empty catalog written
    /// to page 0 immediately; an existing one is loaded and validated
    /// (bad magic means the file is corrupted or not a database).
    pub fn open(pool: &'p BufferPool, is_new: bool) -> Result<Self> {
        let mut catalog = Self {
            pool,
            schemas: BTreeMap::new(),
        };

        if is_new {
            catalog.persist().wrap_err("failed to initialize catalog")?;
        } else {
            catalog.load().wrap_err("failed to load catalog")?;
        }

        Ok(catalog)
    }

    fn load(&mut self) -> Result<()> {
        let guard = self.pool.fetch_read(CATALOG_PAGE_ID)?;
        self.schemas = CatalogPage::decode(guard.data())?;
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        // Encode into a scratch image first; the catalog page is only
        // touched once the whole map is known to fit.
        let mut image = [0u8; PAGE_SIZE];
        CatalogPage::encode(&self.schemas, &mut image)?;
        {
            let mut guard = self.pool.fetch_write(CATALOG_PAGE_ID)?;
            guard.data_mut().copy_from_slice(&image);
        }
        self.pool.flush_page(CATALOG_PAGE_ID)
    }

    /// Creates a table: allocates and formats a head page for every
    /// column, records the schema, and persists the catalog.
    ///
    /// If a head-page allocation fails partway, the schema map is left
    /// untouched; pages already allocated for earlier columns stay in
    /// the file unreferenced (there is no free list to return them to).
    pub fn create_table(&mut self, mut schema: TableSchema) -> Result<()> {
        ensure!(!schema.name().is_empty(), "table name must not be empty");
        ensure!(
            schema.name().len() <= MAX_NAME_LEN,
            "table name '{}' is too long (max {} bytes)",
            schema.name(),
            MAX_NAME_LEN
        );
        ensure!(
            !self.schemas.contains_key(schema.name()),
            "table '{}' already exists",
            schema.name()
        );
        ensure!(
            !schema.columns().is_empty(),
            "table '{}' must have at least one column",
            schema.name()
        );
        for column in schema.columns() {
            ensure!(!column.name().is_empty(), "column name must not be empty");
            ensure!(
                column.name().len() <= MAX_NAME_LEN,
                "column name '{}' is too long (max {} bytes)",
                column.name(),
                MAX_NAME_LEN
            );
        }

        for column in schema.columns_mut() {
            let (page_id, mut guard) = self.pool.new_page().wrap_err_with(|| {
                format!("failed to allocate the head page of column '{}'", column.name())
            })?;
            // A fresh page is all zeros, which would chain to page 0;
            // format it as an empty chain tail before anyone reads it.
            ColumnPageMut::init(guard.data_mut())?;
            column.set_first_page_id(page_id);
        }

        let name = schema.name().to_string();
        self.schemas.insert(name.clone(), schema);
        if let Err(err) = self.persist() {
            self.schemas.remove(&name);
            return Err(err);
        }
        Ok(())
    }

    /// Looks up a table's schema by name.
    pub fn table_schema(&self, name: &str) -> Option<&TableSchema> {
        self.schemas.get(name)
    }

    /// Names of all tables, in sorted order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, DataType};
    use crate::storage::{PageFile, INVALID_PAGE_ID};
    use tempfile::{tempdir, TempDir};

    fn test_pool(pool_size: usize) -> (TempDir, BufferPool, bool) {
        let dir = tempdir().unwrap();
        let file = PageFile::open(dir.path().join("test.db")).unwrap();
        let is_new = file.is_new();
        let pool = BufferPool::new(file, pool_size).unwrap();
        (dir, pool, is_new)
    }

    fn users_schema() -> TableSchema {
        TableSchema::new(
            "users",
            vec![
                Column::new("id", DataType::BigInt),
                Column::new("age", DataType::BigInt),
            ],
        )
    }

    #[test]
    fn new_catalog_starts_empty() {
        let (_dir, pool, is_new) = test_pool(5);
        let catalog = Catalog::open(&pool, is_new).unwrap();
        assert_eq!(catalog.table_names().count(), 0);
    }

    #[test]
    fn create_table_assigns_head_pages() {
        let (_dir, pool, is_new) = test_pool(5);
        let mut catalog = Catalog::open(&pool, is_new).unwrap();

        catalog.create_table(users_schema()).unwrap();

        let schema = catalog.table_schema("users").unwrap();
        assert_eq!(schema.columns()[0].first_page_id(), 1);
        assert_eq!(schema.columns()[1].first_page_id(), 2);
        assert!(schema
            .columns()
            .iter()
            .all(|c| c.first_page_id() != INVALID_PAGE_ID));
    }

    #[test]
    fn duplicate_table_is_rejected() {
        let (_dir, pool, is_new) = test_pool(5);
        let mut catalog = Catalog::open(&pool, is_new).unwrap();

        catalog.create_table(users_schema()).unwrap();
        let err = catalog.create_table(users_schema()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn table_without_columns_is_rejected() {
        let (_dir, pool, is_new) = test_pool(5);
        let mut catalog = Catalog::open(&pool, is_new).unwrap();

        let err = catalog
            .create_table(TableSchema::new("empty", Vec::new()))
            .unwrap_err();
        assert!(err.to_string().contains("at least one column"));
    }

    #[test]
    fn oversized_names_are_rejected() {
        let (_dir, pool, is_new) = test_pool(5);
        let mut catalog = Catalog::open(&pool, is_new).unwrap();

        let long = "n".repeat(MAX_NAME_LEN + 1);
        let err = catalog
            .create_table(TableSchema::new(
                long,
                vec![Column::new("id", DataType::BigInt)],
            ))
            .unwrap_err();
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn failed_head_page_allocation_leaves_catalog_unchanged() {
        // One frame: it is pinned by the guard inside new_page's caller
        // chain only transiently, but the catalog page fetch in persist
        // needs it too. Use a pool of one frame and pin it so the head
        // page allocation cannot find a frame.
        let (_dir, pool, is_new) = test_pool(1);
        let mut catalog = Catalog::open(&pool, is_new).unwrap();

        let _pinned = pool.fetch_write(CATALOG_PAGE_ID).unwrap();
        let err = catalog.create_table(users_schema()).unwrap_err();
        assert!(err.to_string().contains("head page"));
        drop(_pinned);

        assert!(catalog.table_schema("users").is_none());
        assert_eq!(catalog.table_names().count(), 0);
    }

    #[test]
    fn catalog_reloads_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let file = PageFile::open(&path).unwrap();
            let is_new = file.is_new();
            let pool = BufferPool::new(file, 5).unwrap();
            let mut catalog = Catalog::open(&pool, is_new).unwrap();
            catalog.create_table(users_schema()).unwrap();
        }

        let file = PageFile::open(&path).unwrap();
        assert!(!file.is_new());
        let pool = BufferPool::new(file, 5).unwrap();
        let catalog = Catalog::open(&pool, false).unwrap();

        let schema = catalog.table_schema("users").unwrap();
        assert_eq!(schema.name(), "users");
        assert_eq!(schema.column_count(), 2);
        assert_eq!(schema.columns()[0].first_page_id(), 1);
        assert_eq!(schema.columns()[1].first_page_id(), 2);
    }
}
