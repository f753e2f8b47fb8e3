//! # BurrowDB Page Store
//!
//! BurrowDB is an embedded, single-file, copy-on-write database built on
//! memory-mapped fixed-size pages. This crate is its storage core: the mmap
//! page substrate and the free-space manager that decides which pages of the
//! backing file can be reused, and when.
//!
//! ## Architecture Overview
//!
//! Pages are never updated in place. A writer transaction copies every page
//! it touches to a freshly allocated location, and the old copies are freed
//! once no reader can still observe them. That discipline concentrates all
//! space accounting in one structure, the [`FreeList`]:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │        Writer transaction (B-tree layer)      │
//! │   allocate(n)          free(txid, page, ovfl) │
//! ├───────────────────────────────────────────────┤
//! │                   FreeList                    │
//! │   available: [Span]      pending: txid→[Span] │
//! ├───────────────────────────────────────────────┤
//! │      Freelist page (serialized snapshot)      │
//! ├───────────────────────────────────────────────┤
//! │       MmapStorage (4 KiB pages, mmap'd)       │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Freed pages are not reusable immediately: a reader that started before
//! the free happened may still traverse them. Every free is therefore
//! recorded against the freeing transaction's id and promoted to the
//! available pool only when the transaction manager calls
//! [`FreeList::release`] with a threshold no newer than the oldest live
//! reader.
//!
//! ## Span Encoding
//!
//! Free space is tracked as [`Span`]s, contiguous runs of page ids packed
//! into a single `u64` (start in the upper 48 bits, length in the lower 16).
//! Packing the start into the high bits means spans sort and binary-search
//! as plain integers, and a million free pages in one run cost a handful of
//! 8-byte words instead of 8 MB of individual ids.
//!
//! ## Crash Safety
//!
//! On commit the union of available and pending spans is serialized to a
//! fresh freelist page ([`FreeList::write`]). If the process dies before the
//! next commit, every pending page belonged to a transaction that no longer
//! exists, so the next open reads the snapshot with all pending promoted —
//! nothing leaks and nothing is double-allocated.
//!
//! ## Module Overview
//!
//! - [`MmapStorage`]: memory-mapped page file (open/create/grow/sync)
//! - [`PageHeader`]: 16-byte zerocopy header shared by all page kinds
//! - [`Span`]: packed page run plus sorted-span-list routines
//! - [`FreeList`]: allocation, deferred frees, serialization, reload
//!
//! ## Reserved Pages
//!
//! Pages 0 and 1 hold the two meta page copies and are never allocated or
//! freed. The word value 0 is therefore never a legitimate span, which the
//! free list exploits as a "no span" sentinel.

mod freelist;
mod mmap;
mod page;
mod span;

pub use freelist::FreeList;
pub use mmap::MmapStorage;
pub use page::{PageHeader, PageType};
pub use span::{merge_normalize, spans_contain, Span, MAX_SPAN_LEN, MAX_SPAN_START};

/// Identifies a page in the backing file. Pages 0 and 1 are reserved for the
/// meta pages; span starts are limited to 48 bits.
pub type PageId = u64;

/// Monotonically increasing writer transaction id, assigned by the
/// transaction manager. Never reused.
pub type TxnId = u64;

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_HEADER_SIZE: usize = 16;
pub const PAGE_USABLE_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Size of one serialized span word in a freelist page payload.
pub const SPAN_WORD_SIZE: usize = 8;
