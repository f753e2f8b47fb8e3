//! # Memory-Mapped File Storage
//!
//! `MmapStorage` maps the single backing file into the process address
//! space and hands out byte-addressable page buffers. Reads and writes go
//! straight to the mapping; there is no user-space page copy.
//!
//! ## Safety Model
//!
//! A mapped region becomes invalid when the file is grown and remapped.
//! Rather than guarding with epochs or reference counts, `grow()` takes
//! `&mut self`: the borrow checker proves no page slice outlives a remap,
//! at zero runtime cost.
//!
//! ## File Format
//!
//! The file is a flat array of 4 KiB pages. Pages 0 and 1 are the two meta
//! page copies. A multi-page block (a freelist page whose span list
//! outgrew one page, an overflow chain) is `overflow + 1` physically
//! contiguous pages addressed by its first page id; `block()`/`block_mut()`
//! return the whole run as one slice.
//!
//! ## Error Handling
//!
//! All fallible operations return `eyre::Result` carrying the file path or
//! the offending page number.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

use crate::{PageId, PAGE_SIZE};

#[derive(Debug)]
pub struct MmapStorage {
    file: File,
    mmap: MmapMut,
    page_count: u64,
}

impl MmapStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        let metadata = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?;

        let file_size = metadata.len();

        ensure!(
            file_size > 0,
            "cannot open empty database file '{}'",
            path.display()
        );

        ensure!(
            file_size % PAGE_SIZE as u64 == 0,
            "database file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_size,
            PAGE_SIZE
        );

        let page_count = file_size / PAGE_SIZE as u64;

        // SAFETY: MmapMut::map_mut is unsafe because memory-mapped files can
        // be modified externally. This is safe because:
        // 1. The file is opened with exclusive write access (read+write mode)
        // 2. Database files are not modified by external processes
        // 3. The mmap lifetime is tied to MmapStorage, preventing use-after-unmap
        // 4. All access goes through page()/block() which bounds-check page ids
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            page_count,
        })
    }

    pub fn create<P: AsRef<Path>>(path: P, initial_page_count: u64) -> Result<Self> {
        let path = path.as_ref();

        ensure!(
            initial_page_count >= 2,
            "initial page count must cover the two meta pages"
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create database file '{}'", path.display()))?;

        let file_size = initial_page_count * PAGE_SIZE as u64;

        file.set_len(file_size)
            .wrap_err_with(|| format!("failed to set file size to {} bytes", file_size))?;

        // SAFETY: see open(); additionally the file was just created with
        // truncate=true, so no other mapping of it exists.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self {
            file,
            mmap,
            page_count: initial_page_count,
        })
    }

    pub fn page(&self, page_no: PageId) -> Result<&[u8]> {
        self.block(page_no, 1)
    }

    pub fn page_mut(&mut self, page_no: PageId) -> Result<&mut [u8]> {
        self.block_mut(page_no, 1)
    }

    /// Returns `pages` contiguous pages starting at `page_no` as one slice.
    pub fn block(&self, page_no: PageId, pages: u64) -> Result<&[u8]> {
        let (offset, len) = self.block_bounds(page_no, pages)?;
        Ok(&self.mmap[offset..offset + len])
    }

    pub fn block_mut(&mut self, page_no: PageId, pages: u64) -> Result<&mut [u8]> {
        let (offset, len) = self.block_bounds(page_no, pages)?;
        Ok(&mut self.mmap[offset..offset + len])
    }

    fn block_bounds(&self, page_no: PageId, pages: u64) -> Result<(usize, usize)> {
        ensure!(pages > 0, "block at page {} must have at least one page", page_no);
        ensure!(
            page_no < self.page_count && pages <= self.page_count - page_no,
            "block {}..{} out of bounds (page_count={})",
            page_no,
            page_no + pages,
            self.page_count
        );

        Ok((
            page_no as usize * PAGE_SIZE,
            pages as usize * PAGE_SIZE,
        ))
    }

    pub fn grow(&mut self, new_page_count: u64) -> Result<()> {
        if new_page_count <= self.page_count {
            return Ok(());
        }

        self.mmap
            .flush_async()
            .wrap_err("failed to flush mmap before grow")?;

        let new_size = new_page_count * PAGE_SIZE as u64;

        self.file
            .set_len(new_size)
            .wrap_err_with(|| format!("failed to extend file to {} bytes", new_size))?;

        // SAFETY: MmapMut::map_mut is unsafe because the old mmap becomes
        // invalid. This is safe because:
        // 1. grow() takes &mut self, so no page references exist (borrow checker)
        // 2. The old mmap was flushed above
        // 3. The file was extended to new_size before remapping
        // 4. The old mmap is dropped when the new one is assigned
        self.mmap =
            unsafe { MmapMut::map_mut(&self.file).wrap_err("failed to remap file after grow")? };

        self.page_count = new_page_count;

        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to sync mmap to disk")
    }

    pub fn page_count(&self) -> u64 {
        self.page_count
    }

    pub fn file_size(&self) -> u64 {
        self.page_count * PAGE_SIZE as u64
    }

    /// Hints the kernel to fault in a page run ahead of a sequential scan,
    /// e.g. a multi-page freelist block about to be deserialized.
    pub fn prefetch_pages(&self, start_page: PageId, count: u64) {
        if start_page >= self.page_count {
            return;
        }

        let end_page = (start_page + count).min(self.page_count);
        let start_offset = start_page as usize * PAGE_SIZE;
        let len = (end_page - start_page) as usize * PAGE_SIZE;

        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is a hint and cannot corrupt
        // memory. The range is in bounds because:
        // 1. start_page was bounds-checked above
        // 2. end_page is clamped to self.page_count
        // 3. start_offset + len is at most page_count * PAGE_SIZE = file_size
        unsafe {
            libc::madvise(
                self.mmap.as_ptr().add(start_offset) as *mut libc::c_void,
                len,
                libc::MADV_WILLNEED,
            );
        }
    }
}
