//! # Buffer Pool
//!
//! A bounded cache of page frames over a [`PageFile`]. Frames hold one
//! page of content each; residency is tracked in a page table, and
//! unpinned resident frames are evicted in least-recently-used order
//! when space runs out.
//!
//! ## Structure
//!
//! ```text
//! BufferPool
//! ├── frames[n]: RwLock<Box<[u8; PAGE_SIZE]>>   content latches
//! └── Mutex<PoolState>
//!     ├── metas[n]: {page_id, pin_count, dirty}
//!     ├── page_table: page_id -> frame_id
//!     ├── free_list:  frames that hold nothing
//!     └── replacer:   resident frames, MRU front / LRU back
//! ```
//!
//! Every resident frame appears in the page table and the replacer and
//! never on the free list; eviction candidates are resident frames
//! with a zero pin count.
//!
//! ## Pin/Latch Protocol
//!
//! Callers never touch frames directly. [`BufferPool::fetch_read`],
//! [`BufferPool::fetch_write`] and [`BufferPool::new_page`] return
//! guards that hold both a pin (the frame cannot be evicted) and the
//! frame's content latch (readers share, writers exclude). Dropping
//! the guard releases the latch and unpins; a write guard that handed
//! out `data_mut` marks the frame dirty at that point. Dirty bits are
//! sticky: only a successful write-back clears them.
//!
//! ## Locking
//!
//! The pool mutex is never held across disk I/O and is never held
//! while *blocking* on a frame latch: inside the mutex only
//! `try_write` is used, and it can only contend with a stale guard
//! from an aborted load. Latch holders may take the pool mutex (guard
//! drop does), which cannot deadlock under that discipline. On a miss
//! the loading thread keeps the frame's exclusive latch across the
//! read, so concurrent fetchers of the same page park on the latch
//! instead of observing a half-filled frame.
//!
//! ## Failure Semantics
//!
//! A failed backing read rolls the reservation back completely (page
//! table, replacer, metadata, free list) and surfaces the error;
//! waiters that pinned the frame in the meantime detect the recycled
//! frame after acquiring the latch and fail without touching another
//! page's pin count. Pool exhaustion (every frame pinned) is an error
//! the caller reports upward.

use std::collections::VecDeque;

use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::PAGE_SIZE;

use super::page_file::PageFile;
use super::{FrameId, PageId, INVALID_PAGE_ID};

type PageBuf = Box<[u8; PAGE_SIZE]>;

#[derive(Debug)]
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    dirty: bool,
}

impl FrameMeta {
    fn empty() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            dirty: false,
        }
    }

    fn reset(&mut self) {
        *self = Self::empty();
    }
}

#[derive(Debug)]
struct PoolState {
    metas: Vec<FrameMeta>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: VecDeque<FrameId>,
}

impl PoolState {
    /// Moves `frame_id` to the MRU end of the replacer.
    fn touch(&mut self, frame_id: FrameId) {
        if let Some(pos) = self.replacer.iter().position(|&f| f == frame_id) {
            self.replacer.remove(pos);
        }
        self.replacer.push_front(frame_id);
    }
}

#[derive(Debug)]
pub struct BufferPool {
    frames: Vec<RwLock<PageBuf>>,
    state: Mutex<PoolState>,
    file: PageFile,
}

enum Fetched<'a> {
    Hit(FrameId),
    Loaded(FrameId, RwLockWriteGuard<'a, PageBuf>),
}

impl BufferPool {
    pub fn new(file: PageFile, pool_size: usize) -> Result<Self> {
        ensure!(pool_size > 0, "buffer pool needs at least one frame");

        let frames = (0..pool_size)
            .map(|_| RwLock::new(Box::new([0u8; PAGE_SIZE])))
            .collect();
        let state = PoolState {
            metas: (0..pool_size).map(|_| FrameMeta::empty()).collect(),
            page_table: HashMap::with_capacity(pool_size),
            free_list: (0..pool_size).collect(),
            replacer: VecDeque::with_capacity(pool_size),
        };

        Ok(Self {
            frames,
            state: Mutex::new(state),
            file,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    pub fn page_file(&self) -> &PageFile {
        &self.file
    }

    /// Fetches `page_id` for shared access.
    pub fn fetch_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        match self.fetch_inner(page_id)? {
            Fetched::Hit(frame_id) => {
                let latch = self.frames[frame_id].read();
                self.validate_residency(frame_id, page_id)?;
                Ok(PageReadGuard {
                    pool: self,
                    page_id,
                    frame_id,
                    latch: Some(latch),
                })
            }
            Fetched::Loaded(frame_id, latch) => Ok(PageReadGuard {
                pool: self,
                page_id,
                frame_id,
                latch: Some(RwLockWriteGuard::downgrade(latch)),
            }),
        }
    }

    /// Fetches `page_id` for exclusive access.
    pub fn fetch_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        match self.fetch_inner(page_id)? {
            Fetched::Hit(frame_id) => {
                let latch = self.frames[frame_id].write();
                self.validate_residency(frame_id, page_id)?;
                Ok(PageWriteGuard {
                    pool: self,
                    page_id,
                    frame_id,
                    latch: Some(latch),
                    wrote: false,
                })
            }
            Fetched::Loaded(frame_id, latch) => Ok(PageWriteGuard {
                pool: self,
                page_id,
                frame_id,
                latch: Some(latch),
                wrote: false,
            }),
        }
    }

    /// Allocates a fresh page on disk and materializes it, zeroed and
    /// dirty, under an exclusive guard.
    pub fn new_page(&self) -> Result<(PageId, PageWriteGuard<'_>)> {
        let mut state = self.state.lock();
        let (frame_id, mut latch, writeback) = self.reserve_frame(&mut state)?;
        {
            let meta = &mut state.metas[frame_id];
            meta.page_id = INVALID_PAGE_ID;
            meta.pin_count = 1;
            meta.dirty = false;
        }
        drop(state);

        let allocated = (|| -> Result<PageId> {
            if let Some((victim_id, data)) = &writeback {
                self.file
                    .write_page(*victim_id, data)
                    .wrap_err_with(|| format!("failed to write back evicted page {victim_id}"))?;
            }
            latch.fill(0);
            self.file.allocate_page()
        })();

        let page_id = match allocated {
            Ok(page_id) => page_id,
            Err(err) => {
                let mut state = self.state.lock();
                state.metas[frame_id].reset();
                state.free_list.push_back(frame_id);
                return Err(err.wrap_err("failed to materialize new page"));
            }
        };

        let mut state = self.state.lock();
        {
            let meta = &mut state.metas[frame_id];
            meta.page_id = page_id;
            meta.dirty = true;
        }
        state.page_table.insert(page_id, frame_id);
        state.replacer.push_front(frame_id);
        drop(state);

        Ok((
            page_id,
            PageWriteGuard {
                pool: self,
                page_id,
                frame_id,
                latch: Some(latch),
                wrote: false,
            },
        ))
    }

    /// Writes a resident page through to disk and clears its dirty bit.
    /// Fails if the page is not resident. A failed write leaves the
    /// dirty bit set so a later flush retries.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame_id = {
            let mut state = self.state.lock();
            let Some(&frame_id) = state.page_table.get(&page_id) else {
                bail!("cannot flush page {page_id}: not resident");
            };
            // Hold the frame across the I/O.
            state.metas[frame_id].pin_count += 1;
            frame_id
        };

        let result = (|| -> Result<()> {
            let latch = self.frames[frame_id].read();
            self.validate_residency(frame_id, page_id)?;
            self.file.write_page(page_id, &latch)?;
            // Clear dirtiness while the latch is still held so a writer
            // cannot slip between the write-back and the flag update.
            let mut state = self.state.lock();
            let meta = &mut state.metas[frame_id];
            if meta.page_id == page_id {
                meta.dirty = false;
            }
            Ok(())
        })();

        self.unpin(frame_id, page_id, false);
        result.wrap_err_with(|| format!("failed to flush page {page_id}"))
    }

    /// Flushes every dirty resident page.
    pub fn flush_all(&self) -> Result<()> {
        let dirty_pages: Vec<PageId> = {
            let state = self.state.lock();
            state
                .page_table
                .iter()
                .filter(|&(_, &frame_id)| state.metas[frame_id].dirty)
                .map(|(&page_id, _)| page_id)
                .collect()
        };

        for page_id in dirty_pages {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    fn fetch_inner(&self, page_id: PageId) -> Result<Fetched<'_>> {
        ensure!(page_id >= 0, "cannot fetch invalid page id {page_id}");

        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.metas[frame_id].pin_count += 1;
            state.touch(frame_id);
            return Ok(Fetched::Hit(frame_id));
        }

        let (frame_id, mut latch, writeback) = self.reserve_frame(&mut state)?;
        {
            let meta = &mut state.metas[frame_id];
            meta.page_id = page_id;
            meta.pin_count = 1;
            meta.dirty = false;
        }
        state.page_table.insert(page_id, frame_id);
        state.replacer.push_front(frame_id);
        drop(state);

        // I/O happens without the pool mutex; the exclusive latch keeps
        // concurrent fetchers of this page parked until the read lands.
        let io = (|| -> Result<()> {
            if let Some((victim_id, data)) = &writeback {
                self.file
                    .write_page(*victim_id, data)
                    .wrap_err_with(|| format!("failed to write back evicted page {victim_id}"))?;
            }
            latch.fill(0);
            self.file.read_page(page_id, &mut latch)
        })();

        if let Err(err) = io {
            self.abort_load(frame_id, page_id);
            return Err(err.wrap_err(format!("failed to fetch page {page_id}")));
        }

        Ok(Fetched::Loaded(frame_id, latch))
    }

    /// Claims a frame for a new resident page: from the free list if
    /// possible, else by evicting the least recently used unpinned
    /// frame. Returns the frame, its freshly acquired exclusive latch,
    /// and the evicted page's content snapshot if it must be written
    /// back. Runs entirely under the pool mutex; the snapshot lets the
    /// write-back happen after the mutex is released.
    fn reserve_frame<'a>(
        &'a self,
        state: &mut PoolState,
    ) -> Result<(FrameId, RwLockWriteGuard<'a, PageBuf>, Option<(PageId, PageBuf)>)> {
        // A free frame can still be latched for a moment by a stale
        // guard from an aborted load; skip it until the guard is gone.
        for _ in 0..state.free_list.len() {
            let Some(frame_id) = state.free_list.pop_front() else {
                break;
            };
            match self.frames[frame_id].try_write() {
                Some(latch) => return Ok((frame_id, latch, None)),
                None => state.free_list.push_back(frame_id),
            }
        }

        // Scan from the LRU end for an unpinned resident frame. The
        // latch check makes eviction require both a zero pin count and
        // an uncontended latch, so a latched frame is never victimized.
        let mut victim = None;
        for (pos, &frame_id) in state.replacer.iter().enumerate().rev() {
            if state.metas[frame_id].pin_count == 0 {
                if let Some(latch) = self.frames[frame_id].try_write() {
                    victim = Some((pos, frame_id, latch));
                    break;
                }
            }
        }

        let Some((pos, frame_id, latch)) = victim else {
            bail!(
                "buffer pool exhausted: all {} frames are pinned",
                self.frames.len()
            );
        };

        state.replacer.remove(pos);
        let (old_page_id, was_dirty) = {
            let meta = &state.metas[frame_id];
            (meta.page_id, meta.dirty)
        };
        state.page_table.remove(&old_page_id);

        let writeback = was_dirty.then(|| (old_page_id, (*latch).clone()));
        Ok((frame_id, latch, writeback))
    }

    /// Undoes a page reservation after its backing read failed. Any
    /// pins taken by concurrent fetchers are discarded along with the
    /// frame; they detect the recycled frame in `validate_residency`.
    fn abort_load(&self, frame_id: FrameId, page_id: PageId) {
        let mut state = self.state.lock();
        state.page_table.remove(&page_id);
        if let Some(pos) = state.replacer.iter().position(|&f| f == frame_id) {
            state.replacer.remove(pos);
        }
        state.metas[frame_id].reset();
        state.free_list.push_back(frame_id);
    }

    /// Confirms that `frame_id` still holds `page_id` after a latch
    /// acquisition that happened outside the pool mutex.
    fn validate_residency(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        let state = self.state.lock();
        ensure!(
            state.metas[frame_id].page_id == page_id,
            "page {page_id} was dropped from the pool while waiting for its frame"
        );
        Ok(())
    }

    fn unpin(&self, frame_id: FrameId, page_id: PageId, dirty: bool) {
        let mut state = self.state.lock();
        let meta = &mut state.metas[frame_id];
        if meta.page_id != page_id || meta.pin_count == 0 {
            // The frame was recycled after a failed load; this pin no
            // longer exists and the frame may now belong to another page.
            return;
        }
        meta.pin_count -= 1;
        meta.dirty |= dirty;
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        // Teardown flushes whatever is still dirty; errors have nowhere
        // to go from a destructor.
        let _ = self.flush_all();
    }
}

/// Shared access to a pinned page. Dropping releases the latch and the
/// pin, leaving the dirty bit untouched.
#[derive(Debug)]
pub struct PageReadGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame_id: FrameId,
    latch: Option<RwLockReadGuard<'a, PageBuf>>,
}

impl PageReadGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        // INVARIANT: the latch is present until drop.
        self.latch.as_ref().expect("latch held").as_slice()
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        drop(self.latch.take());
        self.pool.unpin(self.frame_id, self.page_id, false);
    }
}

/// Exclusive access to a pinned page. The first `data_mut` call marks
/// the guard dirty; dropping releases the latch and the pin, folding
/// that dirtiness into the frame.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame_id: FrameId,
    latch: Option<RwLockWriteGuard<'a, PageBuf>>,
    wrote: bool,
}

impl PageWriteGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        // INVARIANT: the latch is present until drop.
        self.latch.as_ref().expect("latch held").as_slice()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.wrote = true;
        // INVARIANT: the latch is present until drop.
        self.latch.as_mut().expect("latch held").as_mut_slice()
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        drop(self.latch.take());
        self.pool.unpin(self.frame_id, self.page_id, self.wrote);
    }
}
