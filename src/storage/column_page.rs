//! # Column Data Page Layout
//!
//! Every non-catalog page holds one segment of one column's value
//! chain. The layout is little-endian and position-independent:
//!
//! ```text
//! Offset  Size   Field         Description
//! ------  ----   ------------  -----------------------------------
//! 0       4      next_page_id  Successor page, -1 ends the chain
//! 4       4      value_count   Occupied slots, <= MAX_VALUES_PER_PAGE
//! 8       4088   values        511 i64 slots
//! ```
//!
//! A freshly allocated page is all zeros, which would decode as
//! `next_page_id = 0`, the catalog page. Chains therefore never
//! contain page 0, the views reject it, and every head page is
//! explicitly formatted with [`ColumnPageMut::init`] before use.
//!
//! Access is through zerocopy views over a borrowed page buffer:
//! [`ColumnPage`] for shared reads, [`ColumnPageMut`] for appends and
//! chain linking. Both validate the header on construction so a
//! corrupted page is caught at the first touch.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I32, I64, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{COLUMN_PAGE_HEADER_SIZE, MAX_VALUES_PER_PAGE, PAGE_SIZE};

use super::{PageId, INVALID_PAGE_ID};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ColumnPageHeader {
    next_page_id: I32,
    value_count: U32,
}

const _: () = assert!(std::mem::size_of::<ColumnPageHeader>() == COLUMN_PAGE_HEADER_SIZE);

impl ColumnPageHeader {
    pub fn next_page_id(&self) -> PageId {
        self.next_page_id.get()
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        self.next_page_id = I32::new(page_id);
    }

    pub fn value_count(&self) -> u32 {
        self.value_count.get()
    }

    pub fn set_value_count(&mut self, count: u32) {
        self.value_count = U32::new(count);
    }
}

fn validate_header(header: &ColumnPageHeader) -> Result<()> {
    ensure!(
        header.value_count() as usize <= MAX_VALUES_PER_PAGE,
        "corrupted column page: value count {} exceeds {}",
        header.value_count(),
        MAX_VALUES_PER_PAGE
    );
    ensure!(
        header.next_page_id() == INVALID_PAGE_ID || header.next_page_id() > 0,
        "corrupted column page: next page id {} is not a data page",
        header.next_page_id()
    );
    Ok(())
}

/// Shared view over a column data page.
#[derive(Debug)]
pub struct ColumnPage<'a> {
    header: &'a ColumnPageHeader,
    values: &'a [I64],
}

impl<'a> ColumnPage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );

        let (header_bytes, value_bytes) = data.split_at(COLUMN_PAGE_HEADER_SIZE);
        let header = ColumnPageHeader::ref_from_bytes(header_bytes)
            .map_err(|e| eyre::eyre!("failed to read column page header: {:?}", e))?;
        let values = <[I64]>::ref_from_bytes(value_bytes)
            .map_err(|e| eyre::eyre!("failed to read column page values: {:?}", e))?;

        validate_header(header)?;
        Ok(Self { header, values })
    }

    pub fn next_page_id(&self) -> PageId {
        self.header.next_page_id()
    }

    pub fn value_count(&self) -> u32 {
        self.header.value_count()
    }

    pub fn is_full(&self) -> bool {
        self.header.value_count() as usize == MAX_VALUES_PER_PAGE
    }

    /// Returns the value in slot `index`, if occupied.
    pub fn value(&self, index: u32) -> Option<i64> {
        (index < self.header.value_count()).then(|| self.values[index as usize].get())
    }
}

/// Exclusive view over a column data page.
pub struct ColumnPageMut<'a> {
    header: &'a mut ColumnPageHeader,
    values: &'a mut [I64],
}

impl<'a> ColumnPageMut<'a> {
    pub fn parse(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );

        let (header_bytes, value_bytes) = data.split_at_mut(COLUMN_PAGE_HEADER_SIZE);
        let header = ColumnPageHeader::mut_from_bytes(header_bytes)
            .map_err(|e| eyre::eyre!("failed to read column page header: {:?}", e))?;
        let values = <[I64]>::mut_from_bytes(value_bytes)
            .map_err(|e| eyre::eyre!("failed to read column page values: {:?}", e))?;

        validate_header(header)?;
        Ok(Self { header, values })
    }

    /// Formats `data` as an empty page that ends its chain. This is how
    /// every head page comes into existence; without it the all-zero
    /// fresh page would chain to page 0.
    pub fn init(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        data.fill(0);

        let (header_bytes, value_bytes) = data.split_at_mut(COLUMN_PAGE_HEADER_SIZE);
        let header = ColumnPageHeader::mut_from_bytes(header_bytes)
            .map_err(|e| eyre::eyre!("failed to read column page header: {:?}", e))?;
        let values = <[I64]>::mut_from_bytes(value_bytes)
            .map_err(|e| eyre::eyre!("failed to read column page values: {:?}", e))?;

        header.set_next_page_id(INVALID_PAGE_ID);
        header.set_value_count(0);
        Ok(Self { header, values })
    }

    pub fn next_page_id(&self) -> PageId {
        self.header.next_page_id()
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        self.header.set_next_page_id(page_id);
    }

    pub fn value_count(&self) -> u32 {
        self.header.value_count()
    }

    pub fn is_full(&self) -> bool {
        self.header.value_count() as usize == MAX_VALUES_PER_PAGE
    }

    /// Appends `value` to the next free slot.
    pub fn push(&mut self, value: i64) -> Result<()> {
        let count = self.header.value_count() as usize;
        ensure!(count < MAX_VALUES_PER_PAGE, "column page is full");
        self.values[count] = I64::new(value);
        self.header.set_value_count(count as u32 + 1);
        Ok(())
    }
}
