//! # Catalog Persistence
//!
//! Serialization of the schema map to and from the catalog page
//! (page 0). The layout is little-endian and field-by-field:
//!
//! ```text
//! Offset  Size  Description
//! 0       4     Magic: 0xDEADBEEF
//! 4       4     Format version: 1
//! 8       4     Table count
//! For each table:
//!   - name_len: u16, name: UTF-8 bytes
//!   - column_count: u32
//!   - For each column:
//!       - name_len: u16, name: UTF-8 bytes
//!       - data_type: u8
//!       - first_page_id: i32
//! ```
//!
//! The whole image must fit in one page; encoding fails otherwise.
//! Decoding bounds-checks every cursor advance, so a truncated or
//! corrupted page surfaces as an error rather than a wild read.

use std::collections::BTreeMap;

use eyre::{bail, ensure, Result};

use crate::config::{MAX_NAME_LEN, PAGE_SIZE};
use crate::storage::PageId;

use super::{Column, DataType, TableSchema};

pub(crate) const CATALOG_MAGIC: u32 = 0xDEAD_BEEF;
pub(crate) const CATALOG_FORMAT_VERSION: u32 = 1;

pub(crate) struct CatalogPage;

impl CatalogPage {
    pub fn encode(schemas: &BTreeMap<String, TableSchema>, page: &mut [u8]) -> Result<()> {
        ensure!(
            page.len() == PAGE_SIZE,
            "invalid catalog page size: {} != {}",
            page.len(),
            PAGE_SIZE
        );
        page.fill(0);

        let mut pos = 0;
        write_u32(page, &mut pos, CATALOG_MAGIC)?;
        write_u32(page, &mut pos, CATALOG_FORMAT_VERSION)?;
        write_u32(page, &mut pos, schemas.len() as u32)?;

        for schema in schemas.values() {
            write_name(page, &mut pos, schema.name())?;
            write_u32(page, &mut pos, schema.column_count() as u32)?;
            for column in schema.columns() {
                write_name(page, &mut pos, column.name())?;
                write_u8(page, &mut pos, column.data_type().as_byte())?;
                write_i32(page, &mut pos, column.first_page_id())?;
            }
        }

        Ok(())
    }

    pub fn decode(page: &[u8]) -> Result<BTreeMap<String, TableSchema>> {
        ensure!(
            page.len() == PAGE_SIZE,
            "invalid catalog page size: {} != {}",
            page.len(),
            PAGE_SIZE
        );

        let mut pos = 0;
        let magic = read_u32(page, &mut pos)?;
        ensure!(
            magic == CATALOG_MAGIC,
            "database file is corrupted: bad catalog magic {magic:#010x}"
        );

        let version = read_u32(page, &mut pos)?;
        ensure!(
            version == CATALOG_FORMAT_VERSION,
            "unsupported catalog format version: {} (expected {})",
            version,
            CATALOG_FORMAT_VERSION
        );

        let table_count = read_u32(page, &mut pos)?;
        let mut schemas = BTreeMap::new();

        for _ in 0..table_count {
            let name = read_name(page, &mut pos)?;
            let column_count = read_u32(page, &mut pos)?;
            ensure!(
                column_count > 0,
                "corrupted catalog: table '{name}' has no columns"
            );

            let mut columns = Vec::with_capacity(column_count as usize);
            for _ in 0..column_count {
                let column_name = read_name(page, &mut pos)?;
                let data_type = DataType::from_byte(read_u8(page, &mut pos)?)?;
                let first_page_id: PageId = read_i32(page, &mut pos)?;
                columns.push(Column::with_first_page(column_name, data_type, first_page_id));
            }

            if schemas
                .insert(name.clone(), TableSchema::new(name.clone(), columns))
                .is_some()
            {
                bail!("database file is corrupted: duplicate table '{name}' in catalog");
            }
        }

        Ok(schemas)
    }
}

fn write_u8(page: &mut [u8], pos: &mut usize, value: u8) -> Result<()> {
    ensure!(*pos + 1 <= page.len(), "catalog does not fit in one page");
    page[*pos] = value;
    *pos += 1;
    Ok(())
}

fn write_u16(page: &mut [u8], pos: &mut usize, value: u16) -> Result<()> {
    ensure!(*pos + 2 <= page.len(), "catalog does not fit in one page");
    page[*pos..*pos + 2].copy_from_slice(&value.to_le_bytes());
    *pos += 2;
    Ok(())
}

fn write_u32(page: &mut [u8], pos: &mut usize, value: u32) -> Result<()> {
    ensure!(*pos + 4 <= page.len(), "catalog does not fit in one page");
    page[*pos..*pos + 4].copy_from_slice(&value.to_le_bytes());
    *pos += 4;
    Ok(())
}

fn write_i32(page: &mut [u8], pos: &mut usize, value: i32) -> Result<()> {
    ensure!(*pos + 4 <= page.len(), "catalog does not fit in one page");
    page[*pos..*pos + 4].copy_from_slice(&value.to_le_bytes());
    *pos += 4;
    Ok(())
}

fn write_name(page: &mut [u8], pos: &mut usize, name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    ensure!(
        bytes.len() <= MAX_NAME_LEN,
        "name '{}' is too long (max {} bytes)",
        name,
        MAX_NAME_LEN
    );
    write_u16(page, pos, bytes.len() as u16)?;
    ensure!(
        *pos + bytes.len() <= page.len(),
        "catalog does not fit in one page"
    );
    page[*pos..*pos + bytes.len()].copy_from_slice(bytes);
    *pos += bytes.len();
    Ok(())
}

fn read_u8(page: &[u8], pos: &mut usize) -> Result<u8> {
    ensure!(
        *pos + 1 <= page.len(),
        "unexpected end of catalog page at offset {}",
        *pos
    );
    let value = page[*pos];
    *pos += 1;
    Ok(value)
}

fn read_u16(page: &[u8], pos: &mut usize) -> Result<u16> {
    ensure!(
        *pos + 2 <= page.len(),
        "unexpected end of catalog page at offset {}",
        *pos
    );
    let value = u16::from_le_bytes([page[*pos], page[*pos + 1]]);
    *pos += 2;
    Ok(value)
}

fn read_u32(page: &[u8], pos: &mut usize) -> Result<u32> {
    ensure!(
        *pos + 4 <= page.len(),
        "unexpected end of catalog page at offset {}",
        *pos
    );
    let value = u32::from_le_bytes([page[*pos], page[*pos + 1], page[*pos + 2], page[*pos + 3]]);
    *pos += 4;
    Ok(value)
}

fn read_i32(page: &[u8], pos: &mut usize) -> Result<i32> {
    Ok(read_u32(page, pos)? as i32)
}

fn read_name(page: &[u8], pos: &mut usize) -> Result<String> {
    let len = read_u16(page, pos)? as usize;
    ensure!(len > 0, "corrupted catalog: empty name at offset {}", *pos);
    ensure!(
        len <= MAX_NAME_LEN,
        "corrupted catalog: name length {} exceeds {}",
        len,
        MAX_NAME_LEN
    );
    ensure!(
        *pos + len <= page.len(),
        "unexpected end of catalog page at offset {}",
        *pos
    );
    let name = std::str::from_utf8(&page[*pos..*pos + len])
        .map_err(|e| eyre::eyre!("corrupted catalog: name is not UTF-8: {}", e))?
        .to_string();
    *pos += len;
    Ok(name)
}
