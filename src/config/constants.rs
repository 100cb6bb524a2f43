//! # Configuration Constants
//!
//! Centralizes the constants that define the on-disk page geometry and
//! the buffer pool sizing. Constants that derive from one another are
//! co-located and tied together with compile-time assertions so a
//! change to one cannot silently invalidate another.
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> COLUMN_PAGE_HEADER_SIZE (8 bytes: next_page_id + value_count)
//!       │
//!       └─> MAX_VALUES_PER_PAGE (derived: (PAGE_SIZE - header) / 8)
//! ```

// ============================================================================
// PAGE LAYOUT
// ============================================================================

/// Size of each database page in bytes. The fundamental unit of I/O
/// and of buffer-pool residency.
pub const PAGE_SIZE: usize = 4096;

/// Size of the column data page header: a 4-byte next-page pointer
/// followed by a 4-byte value count.
pub const COLUMN_PAGE_HEADER_SIZE: usize = 8;

/// Number of i64 slots that fit in a column data page after the header.
pub const MAX_VALUES_PER_PAGE: usize =
    (PAGE_SIZE - COLUMN_PAGE_HEADER_SIZE) / std::mem::size_of::<i64>();

const _: () = assert!(
    COLUMN_PAGE_HEADER_SIZE + MAX_VALUES_PER_PAGE * std::mem::size_of::<i64>() <= PAGE_SIZE,
    "column page slots must fit inside a page"
);

const _: () = assert!(MAX_VALUES_PER_PAGE == 511, "MAX_VALUES_PER_PAGE derivation mismatch");

// ============================================================================
// BUFFER POOL
// ============================================================================

/// Default number of frames in the buffer pool.
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 10;

// ============================================================================
// SCHEMA LIMITS
// ============================================================================

/// Maximum byte length of a table or column name.
pub const MAX_NAME_LEN: usize = 31;
