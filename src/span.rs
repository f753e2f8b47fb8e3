//! # Span Encoding
//!
//! A [`Span`] is a contiguous run of free page ids packed into a single
//! `u64`: the start page id in the upper 48 bits, the run length in the
//! lower 16. The packing is load-bearing in three ways:
//!
//! - **Ordering**: with the start in the high bits, spans compare and sort
//!   as plain integers, so sorted span lists binary-search with `u64`
//!   comparisons and serialize as raw words.
//! - **Density**: a freelist page holds 8-byte runs instead of 8-byte
//!   single ids, so one word can cover up to 65,535 pages.
//! - **Sentinel**: page 0 is a reserved meta page and never free, so the
//!   word value 0 ([`Span::NONE`]) unambiguously means "no span".
//!
//! ## Normal Form
//!
//! A sorted, normalized span list has strictly increasing starts, no
//! zero-length spans, and no two adjacent spans left unmerged. Runs longer
//! than 65,535 pages appear as consecutive maximal spans with a short tail.
//! Zero-length spans do occur transiently (the residue of an exact
//! allocation, the hole left by a reload subtraction); [`merge_normalize`]
//! eliminates them before anything is serialized.
//!
//! ## Error Discipline
//!
//! Out-of-range packing, taking `end()` of an empty span, and appending
//! out-of-order or overlapping spans are all bugs in the calling layer, not
//! recoverable conditions. They panic with a descriptive message.

use std::fmt;

use crate::PageId;

/// Largest length a single span can carry.
pub const MAX_SPAN_LEN: u64 = 0xFFFF;

/// Largest page id a span can start at (48 bits).
pub const MAX_SPAN_START: u64 = (1 << 48) - 1;

const SPAN_LEN_BITS: u32 = 16;
const SPAN_LEN_MASK: u64 = 0xFFFF;

/// A contiguous run of page ids, packed as `(start << 16) | length`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Span(u64);

impl Span {
    /// The "no span" sentinel. Page 0 is never free, so the zero word is
    /// never a legitimate span.
    pub const NONE: Span = Span(0);

    pub fn new(start: PageId, len: u64) -> Span {
        assert!(
            start <= MAX_SPAN_START,
            "span start {start} exceeds the 48-bit page id limit"
        );
        assert!(
            len <= MAX_SPAN_LEN,
            "span length {len} exceeds the 16-bit run limit"
        );
        Span(start << SPAN_LEN_BITS | len)
    }

    /// Reinterprets a raw serialized word as a span.
    pub fn from_word(word: u64) -> Span {
        Span(word)
    }

    pub fn to_word(self) -> u64 {
        self.0
    }

    pub fn start(self) -> PageId {
        self.0 >> SPAN_LEN_BITS
    }

    pub fn len(self) -> u64 {
        self.0 & SPAN_LEN_MASK
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The last page id in the span. Panics on empty spans; use [`next`]
    /// when the span may be empty.
    ///
    /// [`next`]: Span::next
    pub fn end(self) -> PageId {
        assert!(!self.is_empty(), "empty spans have no end: {self:?}");
        self.start() + self.len() - 1
    }

    /// The first page id after the span. Defined for empty spans.
    pub fn next(self) -> PageId {
        self.start() + self.len()
    }

    pub fn contains(self, page: PageId) -> bool {
        // Unsigned wrap makes pages below start() compare as huge.
        self.len() != 0 && page.wrapping_sub(self.start()) < self.len()
    }

    pub fn overlaps(self, other: Span) -> bool {
        let (lo, hi) = if other.start() < self.start() {
            (other, self)
        } else {
            (self, other)
        };
        lo.contains(hi.start())
    }

    /// Combines `self` with `other` into up to two spans covering their
    /// union. `other` must not start before `self`, and the two must not
    /// overlap; violating either is a panic.
    ///
    /// - both empty → `(NONE, NONE)`
    /// - one empty → `(other one, NONE)`
    /// - adjacent and the combined length fits → `(merged, NONE)`
    /// - adjacent but over [`MAX_SPAN_LEN`] → `(maximal prefix, remainder)`
    /// - disjoint → `(self, other)` unchanged
    pub fn append(self, other: Span) -> (Span, Span) {
        assert!(
            other.start() >= self.start(),
            "span append out of order: {self:?} then {other:?}"
        );
        assert!(
            !self.overlaps(other),
            "span append overlaps: {self:?} and {other:?}"
        );
        let s = if self.is_empty() { Span::NONE } else { self };
        let t = if other.is_empty() { Span::NONE } else { other };
        if s.is_none() {
            return (t, Span::NONE);
        }
        if t.is_none() {
            return (s, Span::NONE);
        }
        if s.end() + 1 != t.start() {
            return (s, t);
        }
        let combined = s.len() + t.len();
        if combined > MAX_SPAN_LEN {
            let first = Span::new(s.start(), MAX_SPAN_LEN);
            let second = Span::new(s.start() + MAX_SPAN_LEN, combined - MAX_SPAN_LEN);
            return (first, second);
        }
        (Span::new(s.start(), combined), Span::NONE)
    }

    /// Iterates every page id in the span. Expensive; diagnostics only.
    pub fn pages(self) -> impl Iterator<Item = PageId> {
        self.start()..self.next()
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "[{},)", self.start())
        } else {
            write!(f, "[{},{}]", self.start(), self.end())
        }
    }
}

/// Reports whether a sorted span list contains `page`. O(log n).
///
/// The probe `Span::new(page, 0)` sorts after every span starting below
/// `page` and before any span starting at `page` with a positive length, so
/// the containing span, if any, sits at the partition point or immediately
/// before it.
pub fn spans_contain(spans: &[Span], page: PageId) -> bool {
    let probe = Span::new(page, 0);
    let n = spans.partition_point(|&s| s <= probe);
    if n < spans.len() && spans[n].contains(page) {
        return true;
    }
    n > 0 && spans[n - 1].contains(page)
}

/// Merges already-sorted span lists into a single sorted, normalized list:
/// strictly increasing starts, no zero-length spans, no adjacent pair left
/// unmerged, and no span longer than [`MAX_SPAN_LEN`].
///
/// Sort-and-scan, O(N log N) over the total span count. A k-way merge over
/// the pre-sorted inputs could do O(N log k), but must produce byte-for-byte
/// identical output to this routine.
pub fn merge_normalize(sources: &[&[Span]]) -> Vec<Span> {
    let total = sources.iter().map(|s| s.len()).sum();
    let mut dst: Vec<Span> = Vec::with_capacity(total);
    for spans in sources {
        dst.extend_from_slice(spans);
    }
    if dst.is_empty() {
        return dst;
    }
    if sources.len() > 1 {
        dst.sort_unstable();
    }

    // Fold each span into the output tail. A single-span result replaces
    // the tail (it may still merge with the next input); a two-span result
    // commits the first and makes the second the new tail.
    let mut tail = 0;
    for i in 1..dst.len() {
        let (u, v) = dst[tail].append(dst[i]);
        if u.is_none() {
            continue;
        }
        if v.is_none() {
            dst[tail] = u;
        } else {
            dst[tail] = u;
            tail += 1;
            dst[tail] = v;
        }
    }
    dst.truncate(tail + 1);
    // Only all-empty input leaves an empty tail behind.
    if dst.last().is_some_and(|s| s.is_empty()) {
        dst.pop();
    }
    dst
}
