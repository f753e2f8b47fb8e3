//! # Page Types and Header Layout
//!
//! Every 4 KiB page begins with a 16-byte header identifying what the page
//! holds. The freelist page is the only kind this crate serializes itself;
//! the B-tree and meta kinds are defined here so the header namespace is in
//! one place.
//!
//! ## Page Header Layout (16 bytes)
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  -----------------------------------------
//! 0       1     page_type  Kind of page (Meta, BTreeLeaf, FreeList…)
//! 1       1     flags      Per-kind flag bits, currently unused
//! 2       2     count      Entry count; 0xFFFF = overflow encoding
//! 4       4     overflow   Trailing pages in this multi-page block
//! 8       8     reserved
//! ```
//!
//! A block of `overflow + 1` contiguous pages shares a single header; the
//! freelist serializer uses this when the span list outgrows one page.
//!
//! ## Zero-Copy Access
//!
//! `PageHeader` derives the zerocopy traits so headers are read and written
//! directly on mmap'd page buffers without copying. Multi-byte fields use
//! little-endian wrappers; the struct size is checked at compile time.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::PAGE_HEADER_SIZE;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Unknown = 0x00,
    Meta = 0x01,
    BTreeInterior = 0x02,
    BTreeLeaf = 0x03,
    Overflow = 0x04,
    FreeList = 0x05,
}

impl PageType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => PageType::Meta,
            0x02 => PageType::BTreeInterior,
            0x03 => PageType::BTreeLeaf,
            0x04 => PageType::Overflow,
            0x05 => PageType::FreeList,
            _ => PageType::Unknown,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    page_type: u8,
    flags: u8,
    count: U16,
    overflow: U32,
    reserved: [u8; 8],
}

const _: () = assert!(size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    pub fn new(page_type: PageType) -> Self {
        Self {
            page_type: page_type as u8,
            flags: 0,
            count: U16::new(0),
            overflow: U32::new(0),
            reserved: [0; 8],
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        Self::ref_from_bytes(&data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        Self::mut_from_bytes(&mut data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        data[..size_of::<Self>()].copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.page_type)
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        self.page_type = page_type as u8;
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.flags = flags;
    }

    pub fn count(&self) -> u16 {
        self.count.get()
    }

    pub fn set_count(&mut self, count: u16) {
        self.count = U16::new(count);
    }

    pub fn overflow(&self) -> u32 {
        self.overflow.get()
    }

    pub fn set_overflow(&mut self, overflow: u32) {
        self.overflow = U32::new(overflow);
    }
}
