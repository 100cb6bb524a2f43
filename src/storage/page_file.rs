//! # Paged File I/O
//!
//! `PageFile` owns the single database file and exposes it as an array
//! of fixed-size pages. Pages are allocated by appending a zeroed block
//! and are addressed by `page_id * PAGE_SIZE`. All operations go
//! through one mutex, so the file offset can be shared safely between
//! threads.
//!
//! ## File Format
//!
//! ```text
//! Offset 0:      Page 0 (4096 bytes, reserved for the catalog)
//! Offset 4096:   Page 1
//! Offset 8192:   Page 2
//! ...
//! ```
//!
//! The file length is always a multiple of `PAGE_SIZE`. A brand-new
//! (or empty) file gets page 0 written immediately so the catalog has
//! a home before the first allocation.
//!
//! ## Durability
//!
//! `allocate_page` and `write_page` call `sync_data` before returning;
//! a page that has been written is on disk. `read_page` tolerates a
//! short read at the end of the file: the caller's buffer keeps its
//! zeroed tail, which matches what allocation wrote there.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use parking_lot::Mutex;

use crate::config::PAGE_SIZE;

use super::PageId;

const ZERO_PAGE: [u8; PAGE_SIZE] = [0u8; PAGE_SIZE];

#[derive(Debug)]
pub struct PageFile {
    path: PathBuf,
    created: bool,
    inner: Mutex<PageFileInner>,
}

#[derive(Debug)]
struct PageFileInner {
    file: File,
    next_page_id: PageId,
}

impl PageFileInner {
    fn extend_zeroed(&mut self, page_id: PageId) -> Result<()> {
        self.file.seek(SeekFrom::Start(page_offset(page_id)))?;
        self.file.write_all(&ZERO_PAGE)?;
        self.file.sync_data()?;
        Ok(())
    }
}

fn page_offset(page_id: PageId) -> u64 {
    page_id as u64 * PAGE_SIZE as u64
}

impl PageFile {
    /// Opens (creating if necessary) the database file at `path`.
    ///
    /// An empty file is initialized with a zeroed page 0, reserved for
    /// the catalog; [`PageFile::is_new`] reports whether that happened
    /// so the caller knows to write a fresh catalog.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat database file '{}'", path.display()))?
            .len();

        ensure!(
            len % PAGE_SIZE as u64 == 0,
            "database file '{}' is not page-aligned: {} bytes",
            path.display(),
            len
        );

        let created = len == 0;
        let mut inner = PageFileInner {
            file,
            next_page_id: (len / PAGE_SIZE as u64) as PageId,
        };

        if created {
            inner
                .extend_zeroed(0)
                .wrap_err_with(|| format!("failed to initialize '{}'", path.display()))?;
            inner.next_page_id = 1;
        }

        Ok(Self {
            path,
            created,
            inner: Mutex::new(inner),
        })
    }

    /// True if `open` found no existing data and initialized the file.
    pub fn is_new(&self) -> bool {
        self.created
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pages in the file, including the catalog page.
    pub fn page_count(&self) -> u32 {
        self.inner.lock().next_page_id as u32
    }

    /// Extends the file by one zeroed page and returns its id. The new
    /// page is durable before this returns.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let page_id = inner.next_page_id;
        inner
            .extend_zeroed(page_id)
            .wrap_err_with(|| format!("failed to allocate page {page_id}"))?;
        inner.next_page_id += 1;
        Ok(page_id)
    }

    /// Reads page `page_id` into `buf`. A read past the current end of
    /// file fills nothing and leaves the buffer as the caller provided
    /// it; callers zero the buffer first.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        ensure!(page_id >= 0, "cannot read invalid page id {page_id}");

        let mut inner = self.inner.lock();
        inner
            .file
            .seek(SeekFrom::Start(page_offset(page_id)))
            .wrap_err_with(|| format!("failed to seek to page {page_id}"))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = inner
                .file
                .read(&mut buf[filled..])
                .wrap_err_with(|| format!("failed to read page {page_id}"))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(())
    }

    /// Writes `buf` as page `page_id` and syncs before returning.
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        ensure!(page_id >= 0, "cannot write invalid page id {page_id}");

        let mut inner = self.inner.lock();
        inner
            .file
            .seek(SeekFrom::Start(page_offset(page_id)))
            .wrap_err_with(|| format!("failed to seek to page {page_id}"))?;
        inner
            .file
            .write_all(buf)
            .wrap_err_with(|| format!("failed to write page {page_id}"))?;
        inner
            .file
            .sync_data()
            .wrap_err_with(|| format!("failed to sync page {page_id}"))?;
        Ok(())
    }
}
