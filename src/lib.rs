//! # StrataDB Storage Core
//!
//! The storage engine of a small columnar database: a durable paged
//! file, a bounded buffer pool with LRU eviction and pinned RAII page
//! guards, a catalog persisted on page 0, and a table layer that maps
//! row-shaped inserts and scans onto per-column page chains of i64
//! values.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Table (insert / scan)        │
//! ├─────────────────────────────────────┤
//! │      Catalog (schemas, page 0)      │
//! ├─────────────────────────────────────┤
//! │  BufferPool (frames, pins, LRU)     │
//! ├─────────────────────────────────────┤
//! │  PageFile (seek/read/write, alloc)  │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use stratadb::{BufferPool, Catalog, Column, DataType, PageFile, Table, TableSchema};
//!
//! let file = PageFile::open("./mydb.db")?;
//! let is_new = file.is_new();
//! let pool = BufferPool::new(file, stratadb::DEFAULT_BUFFER_POOL_SIZE)?;
//! let mut catalog = Catalog::open(&pool, is_new)?;
//!
//! catalog.create_table(TableSchema::new(
//!     "users",
//!     vec![
//!         Column::new("id", DataType::BigInt),
//!         Column::new("age", DataType::BigInt),
//!     ],
//! ))?;
//!
//! let schema = catalog.table_schema("users").unwrap().clone();
//! let mut users = Table::open(schema, &pool)?;
//! users.insert(&[101, 30])?;
//! for row in users.scan() {
//!     println!("{:?}", row?);
//! }
//! ```
//!
//! ## File Layout
//!
//! A single file whose length is a multiple of 4096. Page 0 holds the
//! catalog (magic-prefixed, versioned); pages 1.. are column data
//! pages, each a header plus up to 511 i64 slots, singly linked into
//! one chain per column per table.
//!
//! ## Concurrency
//!
//! The pool is `Sync`; pages are handed out as guards that pin the
//! frame and hold its read/write latch. `Catalog` and `Table` handles
//! are not internally synchronized; share them with external
//! coordination, or give each thread its own.

pub mod config;
pub mod schema;
pub mod storage;
pub mod table;

pub use config::{DEFAULT_BUFFER_POOL_SIZE, MAX_NAME_LEN, MAX_VALUES_PER_PAGE, PAGE_SIZE};
pub use schema::{Catalog, Column, DataType, TableSchema, CATALOG_PAGE_ID};
pub use storage::{
    BufferPool, ColumnPage, ColumnPageMut, PageFile, PageId, PageReadGuard, PageWriteGuard,
    INVALID_PAGE_ID,
};
pub use table::{Table, TableScan};
