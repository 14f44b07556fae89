//! Memory ranges selected for the dump

use crate::target::{DataTarget, MemoryRegion};

bitflags::bitflags! {
    /// Why a range is in the dump. A merged range carries the reasons of every
    /// range that went into it.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RangeReasons: u16 {
        const STACK = 1 << 0;
        const HEAP_SEGMENT = 1 << 1;
        const HEAP_SUMMARY = 1 << 2;
        const MODULE_IMAGE = 1 << 3;
        const MODULE_HEADER = 1 << 4;
        const ALWAYS_INCLUDE = 1 << 5;
        const RUNTIME_METADATA = 1 << 6;
        const ALLOCATION_CONTEXT = 1 << 7;
        const FINALIZE_QUEUE = 1 << 8;
        const MAPPING = 1 << 9;
    }
}

impl RangeReasons {
    /// `STACK|MAPPING` style rendering for logs and the soft error stream
    pub fn describe(&self) -> String {
        self.iter_names()
            .map(|(name, _)| name)
            .collect::<Vec<_>>()
            .join("|")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub len: u64,
    pub reasons: RangeReasons,
}

impl MemoryRange {
    pub fn new(start: u64, len: u64, reason: RangeReasons) -> Self {
        Self {
            start,
            len,
            reasons: reason,
        }
    }

    /// Ranges running past the end of the address space are cut short
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.len)
    }

    /// Widens the range to whole pages
    pub fn page_aligned(&self, page: u64) -> Self {
        let start = self.start - self.start % page;
        let end = self.end();
        let end = match end % page {
            0 => end,
            rem => end.checked_add(page - rem).unwrap_or(u64::MAX - (page - 1)),
        };
        Self {
            start,
            len: end.saturating_sub(start),
            reasons: self.reasons,
        }
    }
}

/// Sorts ranges by address and coalesces every overlapping or adjacent pair.
/// Empty ranges are dropped. Merging an already merged list returns it
/// unchanged.
pub fn merge_ranges(ranges: impl IntoIterator<Item = MemoryRange>) -> Vec<MemoryRange> {
    let mut ranges: Vec<_> = ranges.into_iter().filter(|r| r.len > 0).collect();
    ranges.sort_by_key(|r| r.start);

    let mut merged: Vec<MemoryRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end() => {
                let end = last.end().max(range.end());
                last.len = end - last.start;
                last.reasons |= range.reasons;
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Cuts a range down to the parts that lie in readable mappings. The second
/// list holds the `[start, end)` gaps that no readable mapping covers, so a
/// bogus range is rejected without touching memory.
pub fn clip_to_regions(
    range: &MemoryRange,
    regions: &[MemoryRegion],
) -> (Vec<MemoryRange>, Vec<(u64, u64)>) {
    let mut readable: Vec<(u64, u64)> = regions
        .iter()
        .filter(|r| r.is_readable() && r.start < range.end() && range.start < r.end)
        .map(|r| (r.start.max(range.start), r.end.min(range.end())))
        .collect();
    readable.sort_unstable();

    let mut inside: Vec<MemoryRange> = Vec::new();
    let mut gaps = Vec::new();
    let mut cursor = range.start;
    for (start, end) in readable {
        if start > cursor {
            gaps.push((cursor, start));
        }
        match inside.last_mut() {
            Some(last) if start <= last.end() => {
                last.len = last.len.max(end - last.start);
            }
            _ => inside.push(MemoryRange::new(start, end - start, range.reasons)),
        }
        cursor = cursor.max(end);
    }
    if cursor < range.end() {
        gaps.push((cursor, range.end()));
    }
    (inside, gaps)
}

/// Splits a page aligned range into the runs of pages that can be read. The
/// second list holds the `[start, end)` runs that couldn't be.
pub fn readable_runs<T: DataTarget>(
    target: &T,
    range: &MemoryRange,
    page: u64,
) -> (Vec<MemoryRange>, Vec<(u64, u64)>) {
    let mut readable = Vec::new();
    let mut unreadable: Vec<(u64, u64)> = Vec::new();
    let mut probe = [0u8; 1];

    let mut address = range.start;
    while address < range.end() {
        let next = address.saturating_add(page).min(range.end());
        if target.read_memory(address, &mut probe).is_ok() {
            match readable.last_mut() {
                Some(MemoryRange { start, len, .. }) if *start + *len == address => {
                    *len += next - address
                }
                _ => readable.push(MemoryRange::new(address, next - address, range.reasons)),
            }
        } else {
            match unreadable.last_mut() {
                Some((_, end)) if *end == address => *end = next,
                _ => unreadable.push((address, next)),
            }
        }
        if next == address {
            break;
        }
        address = next;
    }
    (readable, unreadable)
}

/// Whether `[start, start + len)` lies entirely inside one range of a merged
/// list
pub fn covers(merged: &[MemoryRange], start: u64, len: u64) -> bool {
    let end = start.saturating_add(len);
    let index = merged.partition_point(|r| r.end() <= start);
    merged
        .get(index)
        .is_some_and(|r| r.start <= start && end <= r.end())
}

pub fn total_len(ranges: &[MemoryRange]) -> u64 {
    ranges.iter().map(|r| r.len).sum()
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::target::{memory::MemoryTarget, Backing, Permissions},
    };

    fn r(start: u64, len: u64) -> MemoryRange {
        MemoryRange::new(start, len, RangeReasons::STACK)
    }

    #[test]
    fn merge_coalesces_overlapping_and_adjacent() {
        let merged = merge_ranges([
            MemoryRange::new(0x5000, 0x1000, RangeReasons::HEAP_SEGMENT),
            r(0x1000, 0x1000),
            MemoryRange::new(0x1800, 0x1000, RangeReasons::MODULE_HEADER),
            r(0x2800, 0x800),
            r(0x9000, 0),
            r(0x4000, 0x1000),
        ]);
        assert_eq!(
            merged,
            vec![
                MemoryRange::new(
                    0x1000,
                    0x2000,
                    RangeReasons::STACK | RangeReasons::MODULE_HEADER
                ),
                MemoryRange::new(
                    0x4000,
                    0x2000,
                    RangeReasons::STACK | RangeReasons::HEAP_SEGMENT
                ),
            ]
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let merged = merge_ranges([
            r(0x3000, 0x10),
            r(0x1000, 0x2000),
            r(0x2fff, 0x2),
            r(0x8000, 0x1000),
            r(0x8000, 0x800),
        ]);
        assert_eq!(merge_ranges(merged.clone()), merged);
        for pair in merged.windows(2) {
            assert!(pair[0].end() < pair[1].start, "{pair:x?}");
        }
    }

    #[test]
    fn page_alignment() {
        let aligned = r(0x1010, 0x20).page_aligned(0x1000);
        assert_eq!((aligned.start, aligned.len), (0x1000, 0x1000));
        let aligned = r(0x1000, 0x1001).page_aligned(0x1000);
        assert_eq!((aligned.start, aligned.len), (0x1000, 0x2000));
        let aligned = r(u64::MAX - 0x10, 0x100).page_aligned(0x1000);
        assert_eq!(aligned.start, u64::MAX - 0xfff);
    }

    #[test]
    fn runs_skip_unreadable_pages() {
        let mut t = MemoryTarget::new(1);
        t.add_region(
            0x1000,
            vec![0; 0x4000],
            Permissions::READ,
            Backing::Anonymous,
        );
        t.unmap_page(0x2000);

        let (readable, unreadable) = readable_runs(&t, &r(0x1000, 0x6000), 0x1000);
        assert_eq!(readable, vec![r(0x1000, 0x1000), r(0x3000, 0x2000)]);
        assert_eq!(unreadable, vec![(0x2000, 0x3000), (0x5000, 0x7000)]);
    }

    #[test]
    fn clipping_skips_unmapped_space() {
        let mut t = MemoryTarget::new(1);
        t.add_region(0x1000, vec![0; 0x2000], Permissions::READ, Backing::Anonymous)
            .add_region(0x3000, vec![0; 0x1000], Permissions::READ, Backing::Anonymous)
            .add_region(0x6000, vec![0; 0x1000], Permissions::empty(), Backing::Anonymous);

        // A range running a terabyte past the last mapping
        let range = r(0x2000, 1 << 40);
        let (inside, gaps) = clip_to_regions(&range, t.memory_regions());
        assert_eq!(inside, vec![r(0x2000, 0x2000)]);
        assert_eq!(gaps, vec![(0x4000, 0x2000 + (1 << 40))]);

        let (inside, gaps) = clip_to_regions(&r(0x5000, 0x2000), t.memory_regions());
        assert!(inside.is_empty());
        assert_eq!(gaps, vec![(0x5000, 0x7000)]);
    }

    #[test]
    fn coverage() {
        let merged = merge_ranges([r(0x1000, 0x2000), r(0x8000, 0x1000)]);
        assert!(covers(&merged, 0x1000, 0x2000));
        assert!(covers(&merged, 0x2fff, 1));
        assert!(!covers(&merged, 0x2fff, 2));
        assert!(!covers(&merged, 0x4000, 1));
        assert!(covers(&merged, 0x8800, 0x10));
        assert_eq!(total_len(&merged), 0x3000);
    }
}
