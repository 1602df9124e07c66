//! Sorted sets of disjoint half-open `[from, to)` intervals.
//!
//! Used for stream reassembly (received byte offsets), send-side
//! acknowledgement bookkeeping (acked byte offsets) and packet-number
//! tracking, where a packet number `pn` is stored as `[pn, pn + 1)`.

use core::ops::Range;

/// A sorted, non-overlapping, non-adjacent list of `[from, to)` ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<(u64, u64)>,
}

impl RangeSet {
    pub const fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// A set holding the single range `[from, to)`.
    pub fn from_range(from: u64, to: u64) -> Self {
        let mut set = Self::new();
        set.add(from, to);
        set
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of disjoint ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Iterate ranges in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Range<u64>> + '_ {
        self.ranges.iter().map(|&(s, e)| s..e)
    }

    pub fn first(&self) -> Option<Range<u64>> {
        self.ranges.first().map(|&(s, e)| s..e)
    }

    pub fn last(&self) -> Option<Range<u64>> {
        self.ranges.last().map(|&(s, e)| s..e)
    }

    /// Total number of values covered.
    pub fn covered(&self) -> u64 {
        self.ranges.iter().map(|&(s, e)| e - s).sum()
    }

    pub fn contains(&self, value: u64) -> bool {
        let idx = self.ranges.partition_point(|&(_, e)| e <= value);
        self.ranges.get(idx).is_some_and(|&(s, _)| s <= value)
    }

    /// Does one range of the set contain all of `[from, to)`?
    pub fn covers(&self, from: u64, to: u64) -> bool {
        if from >= to {
            return true;
        }
        let idx = self.ranges.partition_point(|&(_, e)| e <= from);
        self.ranges
            .get(idx)
            .is_some_and(|&(s, e)| s <= from && to <= e)
    }

    /// Insert `[from, to)`, merging with overlapping or adjacent ranges.
    ///
    /// Returns `true` if any value not already present was added; a
    /// repeated or fully-overlapped insert is a no-op returning `false`.
    pub fn add(&mut self, from: u64, to: u64) -> bool {
        if from >= to {
            return false;
        }

        let start = self.ranges.partition_point(|&(_, e)| e < from);
        let mut end = start;
        let mut merged = (from, to);
        let mut already = 0u64;

        while let Some(&(s, e)) = self.ranges.get(end) {
            if s > to {
                break;
            }
            let overlap_start = s.max(from);
            let overlap_end = e.min(to);
            if overlap_end > overlap_start {
                already += overlap_end - overlap_start;
            }
            merged = (merged.0.min(s), merged.1.max(e));
            end += 1;
        }

        let added = already < to - from;
        if added {
            self.ranges.splice(start..end, core::iter::once(merged));
        }
        added
    }

    /// Insert every range of `other`. Returns `true` if anything was new.
    pub fn add_set(&mut self, other: &RangeSet) -> bool {
        let mut added = false;
        for &(s, e) in &other.ranges {
            added |= self.add(s, e);
        }
        added
    }

    /// Subtract `[from, to)` from the set.
    pub fn remove(&mut self, from: u64, to: u64) {
        if from >= to {
            return;
        }
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        for &(s, e) in &self.ranges {
            if e <= from || s >= to {
                out.push((s, e));
                continue;
            }
            if s < from {
                out.push((s, from));
            }
            if e > to {
                out.push((to, e));
            }
        }
        self.ranges = out;
    }

    /// Subtract every range of `other`.
    pub fn remove_set(&mut self, other: &RangeSet) {
        for &(s, e) in &other.ranges {
            self.remove(s, e);
        }
    }

    /// The complement of the set within `[from, to)`.
    pub fn invert(&self, from: u64, to: u64) -> RangeSet {
        let mut out = RangeSet::new();
        let mut cursor = from;
        for &(s, e) in &self.ranges {
            if e <= cursor {
                continue;
            }
            if s >= to {
                break;
            }
            if s > cursor {
                out.ranges.push((cursor, s));
            }
            cursor = e;
        }
        if cursor < to {
            out.ranges.push((cursor, to));
        }
        out
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(set: &RangeSet) -> Vec<(u64, u64)> {
        set.iter().map(|r| (r.start, r.end)).collect()
    }

    #[test]
    fn add_is_idempotent() {
        let mut set = RangeSet::new();
        assert!(set.add(10, 20));
        let snapshot = set.clone();
        assert!(!set.add(10, 20));
        assert_eq!(set, snapshot);
        assert!(!set.add(12, 18));
        assert_eq!(set, snapshot);
    }

    #[test]
    fn add_merges_adjacent_and_overlapping() {
        let mut set = RangeSet::new();
        set.add(0, 5);
        set.add(10, 15);
        assert_eq!(ranges(&set), vec![(0, 5), (10, 15)]);
        assert!(set.add(5, 10));
        assert_eq!(ranges(&set), vec![(0, 15)]);
        assert!(set.add(14, 30));
        assert_eq!(ranges(&set), vec![(0, 30)]);
    }

    #[test]
    fn add_spanning_many() {
        let mut set = RangeSet::new();
        for i in 0..5 {
            set.add(i * 10, i * 10 + 2);
        }
        assert_eq!(set.len(), 5);
        assert!(set.add(1, 45));
        assert_eq!(ranges(&set), vec![(0, 45)]);
    }

    #[test]
    fn partial_overlap_reports_new_bytes() {
        let mut set = RangeSet::from_range(0, 10);
        assert!(set.add(5, 11));
        assert_eq!(ranges(&set), vec![(0, 11)]);
    }

    #[test]
    fn empty_range_is_noop() {
        let mut set = RangeSet::new();
        assert!(!set.add(5, 5));
        assert!(set.is_empty());
    }

    #[test]
    fn invert_complements_within_window() {
        let mut set = RangeSet::new();
        set.add(2, 4);
        set.add(6, 8);
        let inv = set.invert(0, 10);
        assert_eq!(ranges(&inv), vec![(0, 2), (4, 6), (8, 10)]);

        // Disjoint from the set, and the union covers exactly the window.
        for r in inv.iter() {
            for v in r {
                assert!(!set.contains(v));
            }
        }
        let mut union = set.clone();
        union.add_set(&inv);
        assert_eq!(ranges(&union), vec![(0, 10)]);
    }

    #[test]
    fn invert_of_full_and_empty() {
        let full = RangeSet::from_range(0, 100);
        assert!(full.invert(0, 100).is_empty());
        let empty = RangeSet::new();
        assert_eq!(ranges(&empty.invert(0, 7)), vec![(0, 7)]);
        // Ranges past the window are clipped.
        let set = RangeSet::from_range(5, 50);
        assert_eq!(ranges(&set.invert(0, 10)), vec![(0, 5)]);
    }

    #[test]
    fn remove_splits() {
        let mut set = RangeSet::from_range(0, 100);
        set.remove(10, 20);
        assert_eq!(ranges(&set), vec![(0, 10), (20, 100)]);
        let mut other = RangeSet::new();
        other.add(0, 5);
        other.add(90, 200);
        set.remove_set(&other);
        assert_eq!(ranges(&set), vec![(5, 10), (20, 90)]);
    }

    #[test]
    fn contains_and_covers() {
        let mut set = RangeSet::new();
        set.add(3, 4);
        set.add(10, 20);
        assert!(set.contains(3));
        assert!(!set.contains(4));
        assert!(set.contains(19));
        assert!(!set.contains(20));
        assert!(set.covers(10, 20));
        assert!(!set.covers(9, 20));
        assert!(!set.covers(3, 11));
        assert_eq!(set.covered(), 11);
    }
}
