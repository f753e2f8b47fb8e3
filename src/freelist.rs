//! # Free-Space Management
//!
//! This module implements free page tracking and allocation. The free list
//! maintains two pools of [`Span`]s: pages any transaction may reuse
//! immediately, and pages freed by a specific writer transaction that must
//! stay readable until every reader that might still observe them has
//! finished.
//!
//! ## Design Overview
//!
//! Copy-on-write updates free the old copy of every page they touch. Those
//! pages cannot be handed out again right away: a reader holding an older
//! meta page may still walk into them. Each free is therefore recorded in
//! `pending` under the freeing transaction's id; on commit the transaction
//! manager calls [`FreeList::release`] with the oldest live reader's id,
//! promoting every pending list at or below it into `available`.
//!
//! ```text
//!  free(txid, …)          release(oldest)          allocate(n)
//!       │                       │                       │
//!       v                       v                       │
//!  pending[txid] ────────> available ───────────────────┘
//!       │
//!       └─ rollback(txid) discards (pages stay allocated until reopen)
//! ```
//!
//! ## Allocation Strategy
//!
//! First-fit: scan `available` in page order and take the prefix of the
//! first span long enough. The shortened span stays in place, so the list
//! stays sorted without shifting; an exact fit leaves a zero-length residue
//! that the next normalization sweeps out.
//!
//! ## Freelist Page Layout
//!
//! ```text
//! Offset  Size   Description
//! ------  -----  --------------------------------------------
//! 0       16     PageHeader (page_type = FreeList, count, overflow)
//! 16      8*N    Span words, ascending: (start << 16) | length
//! ```
//!
//! `count` holds the span count. When the list outgrows `u16`, `count` is
//! 0xFFFF and the first payload word holds the true count as a raw word;
//! spans then start at word index 1. A block larger than one page records
//! its trailing page count in the header's `overflow` field.
//!
//! ## Crash Safety
//!
//! [`FreeList::write`] serializes the union of available *and* pending. If
//! the process dies, every pending transaction is gone, so the next open
//! may treat the whole snapshot as free; a process that instead observes
//! another writer's snapshot while its own transactions still live rebuilds
//! with [`FreeList::reload`], which subtracts its live pending spans.
//!
//! ## Thread Safety
//!
//! Not thread-safe, by contract: the database-level writer lock admits one
//! mutator at a time, and readers never consult the free list.
//!
//! ## Error Handling
//!
//! Freeing a reserved page, double-freeing, and corrupt span states are
//! bugs in the engine, surfaced as panics. Deserialization of a damaged
//! page reports `eyre` errors. Allocation failure is not an error: it
//! returns `None` and the caller grows the file.

use eyre::{ensure, Result};
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::page::{PageHeader, PageType};
use crate::span::{merge_normalize, spans_contain, Span};
use crate::{PageId, TxnId, PAGE_HEADER_SIZE, PAGE_SIZE, SPAN_WORD_SIZE};

/// `count` value marking the overflow encoding of a freelist page.
const COUNT_OVERFLOW: usize = 0xFFFF;

#[derive(Debug)]
pub struct FreeList {
    /// Sorted spans of pages any transaction may reuse. May carry
    /// zero-length residues between normalizations.
    available: Vec<Span>,
    /// Spans freed by each still-relevant writer transaction, sorted per
    /// transaction.
    pending: HashMap<TxnId, Vec<Span>>,
}

impl FreeList {
    pub fn new() -> Self {
        Self {
            available: Vec::new(),
            pending: HashMap::new(),
        }
    }

    pub fn available(&self) -> &[Span] {
        &self.available
    }

    pub fn pending(&self, txid: TxnId) -> Option<&[Span]> {
        self.pending.get(&txid).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.span_count() == 0
    }

    /// Number of spans across both pools. A loose upper bound for
    /// serialization: normalization may merge some of them.
    pub fn span_count(&self) -> usize {
        self.free_span_count() + self.pending_span_count()
    }

    pub fn free_span_count(&self) -> usize {
        self.available.len()
    }

    pub fn pending_span_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Number of pages tracked across both pools.
    pub fn page_count(&self) -> u64 {
        self.free_page_count() + self.pending_page_count()
    }

    pub fn free_page_count(&self) -> u64 {
        self.available.iter().map(|s| s.len()).sum()
    }

    pub fn pending_page_count(&self) -> u64 {
        self.pending.values().flatten().map(|s| s.len()).sum()
    }

    /// Every tracked page id, sorted. Expensive; diagnostics only.
    pub fn all_pages(&self) -> Vec<PageId> {
        let mut ids: Vec<PageId> = Vec::with_capacity(self.page_count() as usize);
        for span in &self.available {
            ids.extend(span.pages());
        }
        for spans in self.pending.values() {
            for span in spans {
                ids.extend(span.pages());
            }
        }
        ids.sort_unstable();
        ids
    }

    /// Byte size of the serialized freelist page, before normalization.
    /// The page allocator uses this to size the block for the next commit.
    pub fn serialized_size(&self) -> usize {
        let mut n = self.span_count();
        if n >= COUNT_OVERFLOW {
            // The first payload word stores the count. See write().
            n += 1;
        }
        PAGE_HEADER_SIZE + SPAN_WORD_SIZE * n
    }

    /// Returns the first page of a contiguous run of `n` free pages, or
    /// `None` when no available span is long enough (the caller grows the
    /// file). `n == 0` is a no-op and returns `None`.
    pub fn allocate(&mut self, n: u64) -> Option<PageId> {
        if n == 0 {
            return None;
        }
        for i in 0..self.available.len() {
            let span = self.available[i];
            assert!(
                span.start() > 1,
                "invalid page allocation: free span starts at reserved page {}",
                span.start()
            );
            if span.len() < n {
                continue;
            }
            // Take the prefix of the span in place. A zero-length residue
            // is cleaned up by the next normalization.
            self.available[i] = Span::new(span.start() + n, span.len() - n);
            return Some(span.start());
        }
        None
    }

    /// Records a freed run of `overflow + 1` pages starting at `page_id`
    /// against `txid`. Panics on reserved pages and on double-frees.
    pub fn free(&mut self, txid: TxnId, page_id: PageId, overflow: u32) {
        assert!(page_id > 1, "cannot free reserved page {page_id}");
        assert!(!self.freed(page_id), "page {page_id} freed twice");

        let span = Span::new(page_id, u64::from(overflow) + 1);
        let spans = self.pending.entry(txid).or_default();
        let n = spans.partition_point(|&s| s <= span);
        if n == spans.len() {
            spans.push(span);
        } else {
            // Merge forward into the successor when adjacent. Backward
            // adjacency is healed by the next normalization.
            let (u, v) = span.append(spans[n]);
            if v.is_none() {
                spans[n] = u;
            } else {
                spans[n] = u;
                spans.insert(n + 1, v);
            }
        }
    }

    /// Promotes every pending list with id `<= txid` into the available
    /// pool. This is the one point where adjacencies between formerly
    /// pending and long-available runs get fused.
    pub fn release(&mut self, txid: TxnId) {
        let mut moved: Vec<Vec<Span>> = Vec::new();
        self.pending.retain(|&tid, spans| {
            if tid <= txid {
                moved.push(std::mem::take(spans));
                false
            } else {
                true
            }
        });

        let available = std::mem::take(&mut self.available);
        let mut sources: SmallVec<[&[Span]; 8]> = SmallVec::new();
        sources.push(&available);
        sources.extend(moved.iter().map(Vec::as_slice));
        self.available = merge_normalize(&sources);
    }

    /// Discards `txid`'s pending spans. They stay allocated from this
    /// process's perspective; a reopen promotes them, matching what a
    /// crash would have done.
    pub fn rollback(&mut self, txid: TxnId) {
        self.pending.remove(&txid);
    }

    /// Reports whether `page_id` is tracked as free or pending-free.
    pub fn freed(&self, page_id: PageId) -> bool {
        if spans_contain(&self.available, page_id) {
            return true;
        }
        self.pending.values().any(|s| spans_contain(s, page_id))
    }

    /// Deserializes the available pool from a freelist page. `pending` is
    /// left untouched; reload() builds on this.
    pub fn read(&mut self, page: &[u8]) -> Result<()> {
        let header = PageHeader::from_bytes(page)?;
        ensure!(
            header.page_type() == PageType::FreeList,
            "not a freelist page: {:?}",
            header.page_type()
        );

        let payload = &page[PAGE_HEADER_SIZE..];
        let mut idx = 0usize;
        let mut count = header.count() as usize;
        if count == COUNT_OVERFLOW {
            ensure!(
                payload.len() >= SPAN_WORD_SIZE,
                "freelist page too small for its count word"
            );
            count = get_span_word(payload, 0) as usize;
            idx = 1;
        }

        ensure!(
            payload.len() / SPAN_WORD_SIZE - idx >= count,
            "freelist page truncated: {} spans do not fit in {} bytes",
            count,
            page.len()
        );

        let mut spans = Vec::with_capacity(count);
        let mut prev = 0u64;
        for i in idx..idx + count {
            let word = get_span_word(payload, i);
            ensure!(
                word > prev,
                "freelist page corrupt: span words not ascending at index {}",
                i - idx
            );
            let span = Span::from_word(word);
            ensure!(
                span.start() > 1,
                "freelist page corrupt: span {:?} covers a reserved page",
                span
            );
            spans.push(span);
            prev = word;
        }

        self.available = spans;
        Ok(())
    }

    /// Serializes the union of available and pending into a freelist page
    /// buffer of one or more whole pages. Pending spans are written as free
    /// so that a crash before the next commit loses nothing; a clean reopen
    /// promotes them, which is exactly what release() would have done.
    pub fn write(&self, page: &mut [u8]) -> Result<()> {
        ensure!(
            !page.is_empty() && page.len() % PAGE_SIZE == 0,
            "freelist buffer must be one or more whole pages, got {} bytes",
            page.len()
        );
        let needed = self.serialized_size();
        ensure!(
            page.len() >= needed,
            "freelist buffer too small: {} < {}",
            page.len(),
            needed
        );

        let mut header = PageHeader::new(PageType::FreeList);
        header.set_overflow((page.len() / PAGE_SIZE - 1) as u32);

        let n = self.span_count();
        if n == 0 {
            header.write_to(page)?;
            return Ok(());
        }

        let spans = self.copy_all();
        let payload = &mut page[PAGE_HEADER_SIZE..];
        if n < COUNT_OVERFLOW {
            header.set_count(spans.len() as u16);
            for (i, span) in spans.iter().enumerate() {
                put_span_word(payload, i, span.to_word());
            }
        } else {
            // The count field cannot hold the total; store it in the first
            // payload word as a raw span word.
            header.set_count(COUNT_OVERFLOW as u16);
            put_span_word(payload, 0, spans.len() as u64);
            for (i, span) in spans.iter().enumerate() {
                put_span_word(payload, i + 1, span.to_word());
            }
        }
        header.write_to(page)?;
        Ok(())
    }

    /// Rebuilds in-memory state from another writer's freelist page while
    /// this process still has live pending transactions: re-reads the
    /// available pool, then subtracts every live pending span from it (the
    /// on-disk image counts them as free).
    pub fn reload(&mut self, page: &[u8]) -> Result<()> {
        self.read(page)?;

        let sources: SmallVec<[&[Span]; 8]> =
            self.pending.values().map(Vec::as_slice).collect();
        let pending = merge_normalize(&sources);
        drop(sources);

        for rm in pending {
            self.remove_from_available(rm);
        }
        Ok(())
    }

    /// Sorted, normalized union of available and all pending spans.
    fn copy_all(&self) -> Vec<Span> {
        let mut sources: SmallVec<[&[Span]; 8]> = SmallVec::new();
        sources.push(&self.available);
        sources.extend(self.pending.values().map(Vec::as_slice));
        merge_normalize(&sources)
    }

    /// Carves `rm` out of the available pool. `rm` must be a sub-span of
    /// exactly one available span; anything else means the on-disk image
    /// and the live pending set disagree, which is fatal.
    fn remove_from_available(&mut self, rm: Span) {
        let n = self.available.partition_point(|&s| s <= rm);

        if n < self.available.len() {
            let s = self.available[n];
            if s.start() == rm.start() {
                // rm is a strict prefix of s.
                self.available[n] = Span::new(s.start() + rm.len(), s.len() - rm.len());
                return;
            }
        }

        assert!(n > 0, "pending span {rm:?} missing from the on-disk freelist");
        let s = self.available[n - 1];

        if s.start() == rm.start() {
            // Exact match; the residue is dropped by the next
            // serialization.
            assert!(
                s.len() == rm.len(),
                "pending span {rm:?} extends past its freelist span {s:?}"
            );
            self.available[n - 1] = Span::new(s.start(), 0);
            return;
        }

        assert!(
            s.contains(rm.start()),
            "pending span {rm:?} missing from the on-disk freelist"
        );

        if s.next() == rm.next() {
            // rm is a suffix of s.
            self.available[n - 1] = Span::new(s.start(), s.len() - rm.len());
            return;
        }

        assert!(
            rm.next() < s.next(),
            "pending span {rm:?} extends past its freelist span {s:?}"
        );

        // rm splits s in the middle: shrink the left half in place and
        // insert the right half after it.
        self.available[n - 1] = Span::new(s.start(), rm.start() - s.start());
        self.available
            .insert(n, Span::new(rm.next(), s.next() - rm.next()));
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

fn get_span_word(payload: &[u8], index: usize) -> u64 {
    let off = index * SPAN_WORD_SIZE;
    u64::from_le_bytes(payload[off..off + SPAN_WORD_SIZE].try_into().unwrap())
}

fn put_span_word(payload: &mut [u8], index: usize, word: u64) {
    let off = index * SPAN_WORD_SIZE;
    payload[off..off + SPAN_WORD_SIZE].copy_from_slice(&word.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_freelist_is_empty() {
        let f = FreeList::new();

        assert!(f.is_empty());
        assert_eq!(f.span_count(), 0);
        assert_eq!(f.page_count(), 0);
        assert_eq!(f.serialized_size(), PAGE_HEADER_SIZE);
    }

    #[test]
    fn free_single_page_records_pending() {
        let mut f = FreeList::new();

        f.free(100, 12, 0);

        assert_eq!(f.pending(100).unwrap(), &[Span::new(12, 1)]);
    }

    #[test]
    fn free_with_overflow_records_whole_run() {
        let mut f = FreeList::new();

        f.free(100, 12, 3);

        assert_eq!(f.pending(100).unwrap(), &[Span::new(12, 4)]);
        assert_eq!(f.pending_page_count(), 4);
    }

    #[test]
    fn free_merges_with_following_pending_span() {
        let mut f = FreeList::new();

        f.free(100, 13, 0);
        f.free(100, 12, 0);

        assert_eq!(f.pending(100).unwrap(), &[Span::new(12, 2)]);
    }

    #[test]
    fn free_keeps_pending_sorted() {
        let mut f = FreeList::new();

        f.free(100, 39, 0);
        f.free(100, 9, 0);
        f.free(100, 12, 1);

        assert_eq!(
            f.pending(100).unwrap(),
            &[Span::new(9, 1), Span::new(12, 2), Span::new(39, 1)]
        );
    }

    #[test]
    #[should_panic(expected = "cannot free reserved page")]
    fn free_reserved_page_panics() {
        FreeList::new().free(100, 1, 0);
    }

    #[test]
    #[should_panic(expected = "freed twice")]
    fn double_free_in_same_transaction_panics() {
        let mut f = FreeList::new();

        f.free(100, 12, 0);
        f.free(100, 12, 0);
    }

    #[test]
    #[should_panic(expected = "freed twice")]
    fn double_free_of_interior_page_panics() {
        let mut f = FreeList::new();

        f.free(100, 12, 3);
        f.free(101, 14, 0);
    }

    #[test]
    #[should_panic(expected = "freed twice")]
    fn double_free_of_available_page_panics() {
        let mut f = FreeList::new();
        f.free(100, 12, 0);
        f.release(100);

        f.free(101, 12, 0);
    }

    #[test]
    fn release_promotes_transactions_up_to_threshold() {
        let mut f = FreeList::new();
        f.free(100, 12, 1);
        f.free(100, 9, 0);
        f.free(102, 39, 0);

        f.release(100);
        f.release(101);

        assert_eq!(f.available(), &[Span::new(9, 1), Span::new(12, 2)]);
        assert!(f.pending(100).is_none());
        assert!(f.pending(102).is_some());

        f.release(102);

        assert_eq!(
            f.available(),
            &[Span::new(9, 1), Span::new(12, 2), Span::new(39, 1)]
        );
        assert_eq!(f.pending_span_count(), 0);
        assert_normalized(f.available());
    }

    #[test]
    fn release_fuses_pending_with_available_runs() {
        let mut f = FreeList::new();
        f.free(1, 12, 1);
        f.release(1);

        f.free(2, 14, 0);
        f.release(2);

        assert_eq!(f.available(), &[Span::new(12, 3)]);
        assert_normalized(f.available());
    }

    #[test]
    fn release_sweeps_allocation_residue() {
        let mut f = from_spans(&[Span::new(3, 2), Span::new(9, 1)]);

        assert_eq!(f.allocate(2), Some(3));
        assert_eq!(f.available()[0], Span::new(5, 0));

        f.release(1);

        assert_eq!(f.available(), &[Span::new(9, 1)]);
        assert_normalized(f.available());
    }

    #[test]
    fn rollback_discards_pending_without_promoting() {
        let mut f = FreeList::new();
        f.free(100, 12, 0);

        f.rollback(100);

        assert!(f.pending(100).is_none());
        assert!(f.available().is_empty());
        assert!(!f.freed(12));
    }

    #[test]
    fn rollback_leaves_other_transactions_alone() {
        let mut f = FreeList::new();
        f.free(100, 12, 0);
        f.free(101, 30, 0);

        f.rollback(100);

        assert_eq!(f.pending(101).unwrap(), &[Span::new(30, 1)]);
    }

    #[test]
    fn allocate_scans_first_fit() {
        // Runs 3..=7, 9, 12..=13, 18.
        let mut f = from_spans(&[
            Span::new(3, 5),
            Span::new(9, 1),
            Span::new(12, 2),
            Span::new(18, 1),
        ]);
        let steps: [(u64, Option<PageId>, &[Span]); 8] = [
            (
                3,
                Some(3),
                &[Span::new(6, 2), Span::new(9, 1), Span::new(12, 2), Span::new(18, 1)],
            ),
            (
                1,
                Some(9),
                &[Span::new(6, 2), Span::new(10, 0), Span::new(12, 2), Span::new(18, 1)],
            ),
            (
                1,
                Some(18),
                &[Span::new(6, 2), Span::new(10, 0), Span::new(12, 2), Span::new(19, 0)],
            ),
            (
                3,
                None,
                &[Span::new(6, 2), Span::new(10, 0), Span::new(12, 2), Span::new(19, 0)],
            ),
            (
                2,
                Some(6),
                &[Span::new(8, 0), Span::new(10, 0), Span::new(12, 2), Span::new(19, 0)],
            ),
            (
                2,
                Some(12),
                &[Span::new(8, 0), Span::new(10, 0), Span::new(14, 0), Span::new(19, 0)],
            ),
            (
                1,
                None,
                &[Span::new(8, 0), Span::new(10, 0), Span::new(14, 0), Span::new(19, 0)],
            ),
            (
                0,
                None,
                &[Span::new(8, 0), Span::new(10, 0), Span::new(14, 0), Span::new(19, 0)],
            ),
        ];

        for (n, want, after) in steps {
            let before: Vec<Span> = f.available().to_vec();
            let got = f.allocate(n);
            assert_eq!(got, want, "allocate({n}) from {before:?}");
            assert_eq!(f.available(), after, "state after allocate({n})");
        }
    }

    #[test]
    fn allocate_from_empty_freelist_returns_none() {
        assert_eq!(FreeList::new().allocate(1), None);
    }

    #[test]
    fn allocate_zero_pages_is_a_noop() {
        let mut f = from_spans(&[Span::new(3, 5)]);

        assert_eq!(f.allocate(0), None);
        assert_eq!(f.available(), &[Span::new(3, 5)]);
    }

    #[test]
    #[should_panic(expected = "invalid page allocation")]
    fn allocate_panics_on_reserved_span_start() {
        let mut f = from_spans(&[Span::new(1, 3)]);

        f.allocate(1);
    }

    #[test]
    fn freed_sees_both_pools_including_interior_pages() {
        let mut f = from_spans(&[Span::new(20, 3)]);
        f.free(100, 12, 3);

        for page in [12, 13, 14, 15, 20, 21, 22] {
            assert!(f.freed(page), "page {page} should be freed");
        }
        for page in [0, 1, 11, 16, 19, 23] {
            assert!(!f.freed(page), "page {page} should not be freed");
        }
    }

    #[test]
    fn write_then_read_round_trips_with_pending_promoted() {
        let mut f = from_spans(&[Span::new(12, 1), Span::new(39, 1)]);
        f.free(100, 28, 0);
        f.free(100, 11, 0);
        f.free(101, 3, 0);
        let mut page = vec![0u8; PAGE_SIZE];

        f.write(&mut page).unwrap();

        let header = PageHeader::from_bytes(&page).unwrap();
        assert_eq!(header.page_type(), PageType::FreeList);
        assert_eq!(header.count(), 4);

        let mut f2 = FreeList::new();
        f2.read(&page).unwrap();

        // 11 and 12 fuse across the pending/available boundary.
        assert_eq!(
            f2.available(),
            &[
                Span::new(3, 1),
                Span::new(11, 2),
                Span::new(28, 1),
                Span::new(39, 1),
            ]
        );
        assert_eq!(f2.pending_span_count(), 0);
        assert_normalized(f2.available());
    }

    #[test]
    fn write_empty_freelist_stores_zero_count() {
        let f = FreeList::new();
        let mut page = vec![0u8; PAGE_SIZE];

        f.write(&mut page).unwrap();

        let header = PageHeader::from_bytes(&page).unwrap();
        assert_eq!(header.count(), 0);

        let mut f2 = FreeList::new();
        f2.read(&page).unwrap();
        assert!(f2.available().is_empty());
    }

    #[test]
    fn write_records_trailing_pages_in_overflow_field() {
        let f = from_spans(&[Span::new(7, 2)]);
        let mut block = vec![0u8; PAGE_SIZE * 3];

        f.write(&mut block).unwrap();

        let header = PageHeader::from_bytes(&block).unwrap();
        assert_eq!(header.overflow(), 2);
    }

    #[test]
    fn write_rejects_undersized_buffer() {
        let mut f = FreeList::new();
        for i in 0..600u64 {
            f.free(1, 2 + i * 2, 0);
        }
        let mut page = vec![0u8; PAGE_SIZE];

        let result = f.write(&mut page);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("too small"));
    }

    #[test]
    fn write_rejects_partial_page_buffer() {
        let f = FreeList::new();
        let mut buf = vec![0u8; PAGE_SIZE - 1];

        assert!(f.write(&mut buf).is_err());
    }

    #[test]
    fn read_rejects_wrong_page_type() {
        let mut page = vec![0u8; PAGE_SIZE];
        PageHeader::new(PageType::BTreeLeaf).write_to(&mut page).unwrap();

        let mut f = FreeList::new();
        let result = f.read(&page);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not a freelist page"));
    }

    #[test]
    fn read_rejects_unsorted_span_words() {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut header = PageHeader::new(PageType::FreeList);
        header.set_count(2);
        header.write_to(&mut page).unwrap();
        put_span_word(&mut page[PAGE_HEADER_SIZE..], 0, Span::new(9, 1).to_word());
        put_span_word(&mut page[PAGE_HEADER_SIZE..], 1, Span::new(4, 1).to_word());

        let mut f = FreeList::new();
        let result = f.read(&page);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not ascending"));
    }

    #[test]
    fn read_rejects_reserved_page_span() {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut header = PageHeader::new(PageType::FreeList);
        header.set_count(1);
        header.write_to(&mut page).unwrap();
        put_span_word(&mut page[PAGE_HEADER_SIZE..], 0, Span::new(1, 2).to_word());

        let mut f = FreeList::new();
        let result = f.read(&page);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("reserved"));
    }

    #[test]
    fn large_span_count_uses_overflow_encoding() {
        let spans: Vec<Span> = (0..70_000u64).map(|i| Span::new(2 + i * 2, 1)).collect();
        let f = from_spans(&spans);
        let needed = f.serialized_size();
        assert_eq!(needed, PAGE_HEADER_SIZE + SPAN_WORD_SIZE * 70_001);
        let mut block = vec![0u8; needed.div_ceil(PAGE_SIZE) * PAGE_SIZE];

        f.write(&mut block).unwrap();

        let header = PageHeader::from_bytes(&block).unwrap();
        assert_eq!(header.count(), 0xFFFF);
        assert_eq!(get_span_word(&block[PAGE_HEADER_SIZE..], 0), 70_000);

        let mut f2 = FreeList::new();
        f2.read(&block).unwrap();
        assert_eq!(f2.available(), spans.as_slice());
    }

    #[test]
    fn serialized_size_tracks_span_count() {
        let mut f = FreeList::new();
        assert_eq!(f.serialized_size(), PAGE_HEADER_SIZE);

        f.free(100, 12, 0);
        f.free(100, 39, 0);
        assert_eq!(f.serialized_size(), PAGE_HEADER_SIZE + 2 * SPAN_WORD_SIZE);
    }

    #[test]
    fn reload_shrinks_prefix_of_containing_span() {
        let mut f = FreeList::new();
        f.pending.insert(7, vec![Span::new(20, 2)]);

        f.reload(&page_with(&[Span::new(20, 5)])).unwrap();

        assert_eq!(f.available(), &[Span::new(22, 3)]);
        assert_eq!(f.pending(7).unwrap(), &[Span::new(20, 2)]);
    }

    #[test]
    fn reload_leaves_residue_on_exact_match() {
        let mut f = FreeList::new();
        f.pending.insert(7, vec![Span::new(30, 2)]);

        f.reload(&page_with(&[Span::new(20, 5), Span::new(30, 2)])).unwrap();

        assert_eq!(f.available(), &[Span::new(20, 5), Span::new(30, 0)]);
        assert_eq!(f.pending(7).unwrap(), &[Span::new(30, 2)]);
    }

    #[test]
    fn reload_shrinks_suffix_of_containing_span() {
        let mut f = FreeList::new();
        f.pending.insert(7, vec![Span::new(23, 2)]);

        f.reload(&page_with(&[Span::new(20, 5)])).unwrap();

        assert_eq!(f.available(), &[Span::new(20, 3)]);
    }

    #[test]
    fn reload_splits_punctured_span() {
        let mut f = FreeList::new();
        f.pending.insert(7, vec![Span::new(22, 2)]);

        f.reload(&page_with(&[Span::new(20, 6)])).unwrap();

        assert_eq!(f.available(), &[Span::new(20, 2), Span::new(24, 2)]);
    }

    #[test]
    fn reload_subtracts_all_live_transactions() {
        let mut f = FreeList::new();
        f.pending.insert(7, vec![Span::new(22, 1)]);
        f.pending.insert(9, vec![Span::new(24, 1)]);

        f.reload(&page_with(&[Span::new(20, 6)])).unwrap();

        assert_eq!(
            f.available(),
            &[Span::new(20, 2), Span::new(23, 1), Span::new(25, 1)]
        );
        assert_eq!(f.pending_span_count(), 2);
    }

    #[test]
    #[should_panic(expected = "missing from the on-disk freelist")]
    fn reload_panics_when_pending_span_not_covered() {
        let mut f = FreeList::new();
        f.pending.insert(7, vec![Span::new(30, 1)]);

        let _ = f.reload(&page_with(&[Span::new(20, 2)]));
    }

    #[test]
    fn write_after_reload_drops_residue_and_restores_union() {
        let mut f = FreeList::new();
        f.pending.insert(7, vec![Span::new(30, 2)]);
        f.reload(&page_with(&[Span::new(20, 5), Span::new(30, 2)])).unwrap();
        let mut page = vec![0u8; PAGE_SIZE];

        f.write(&mut page).unwrap();

        let mut f2 = FreeList::new();
        f2.read(&page).unwrap();
        assert_eq!(f2.available(), &[Span::new(20, 5), Span::new(30, 2)]);
        assert_normalized(f2.available());
    }

    fn from_spans(spans: &[Span]) -> FreeList {
        FreeList {
            available: spans.to_vec(),
            pending: HashMap::new(),
        }
    }

    fn page_with(spans: &[Span]) -> Vec<u8> {
        let f = from_spans(spans);
        let mut page = vec![0u8; f.serialized_size().div_ceil(PAGE_SIZE) * PAGE_SIZE];
        f.write(&mut page).unwrap();
        page
    }

    fn assert_normalized(spans: &[Span]) {
        for pair in spans.windows(2) {
            assert!(pair[0] < pair[1], "spans out of order: {pair:?}");
            assert!(
                pair[0].next() < pair[1].start(),
                "adjacent spans left unmerged: {pair:?}"
            );
        }
        for span in spans {
            assert!(!span.is_empty(), "zero-length span survived: {span:?}");
            assert!(span.start() > 1, "span covers a reserved page: {span:?}");
        }
    }
}
