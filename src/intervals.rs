//! Ordered codepoint interval sets.
//!
//! An `IntervalSet` is a sorted list of disjoint, inclusive codepoint
//! ranges. It is the substrate for every character and string strategy:
//! membership tells a filter whether a character is allowed, and ordinal
//! indexing (index 0 is the lowest codepoint) is what lets a string draw
//! pick "the nth allowed character" from a handful of bytes, with smaller
//! indices decoding to simpler characters.

/// A set of Unicode codepoints stored as sorted inclusive ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalSet {
    intervals: Vec<(u32, u32)>,
    size: u64,
}

impl IntervalSet {
    /// Build a set from arbitrary inclusive ranges. Ranges are sorted,
    /// merged, and empty ranges dropped.
    pub fn new(mut intervals: Vec<(u32, u32)>) -> IntervalSet {
        intervals.retain(|(lo, hi)| lo <= hi);
        intervals.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(intervals.len());
        for (lo, hi) in intervals {
            match merged.last_mut() {
                Some((_, prev_hi)) if lo <= prev_hi.saturating_add(1) => {
                    *prev_hi = (*prev_hi).max(hi);
                }
                _ => merged.push((lo, hi)),
            }
        }
        let size = merged.iter().map(|(lo, hi)| (hi - lo) as u64 + 1).sum();
        IntervalSet {
            intervals: merged,
            size,
        }
    }

    pub fn empty() -> IntervalSet {
        IntervalSet::new(Vec::new())
    }

    /// The inclusive range `lo..=hi`.
    pub fn from_range(lo: char, hi: char) -> IntervalSet {
        IntervalSet::new(vec![(lo as u32, hi as u32)])
    }

    /// One singleton range per character in `s`.
    pub fn from_chars(s: &str) -> IntervalSet {
        IntervalSet::new(s.chars().map(|c| (c as u32, c as u32)).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Number of codepoints in the set.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn ranges(&self) -> &[(u32, u32)] {
        &self.intervals
    }

    pub fn contains(&self, c: char) -> bool {
        let cp = c as u32;
        self.intervals
            .binary_search_by(|&(lo, hi)| {
                if cp < lo {
                    std::cmp::Ordering::Greater
                } else if cp > hi {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// The `index`th codepoint in ascending order, or `None` when out of
    /// range. Surrogate codepoints are never stored, so any in-range index
    /// decodes to a valid `char`.
    pub fn char_at(&self, index: u64) -> Option<char> {
        let mut remaining = index;
        for &(lo, hi) in &self.intervals {
            let span = (hi - lo) as u64 + 1;
            if remaining < span {
                return char::from_u32(lo + remaining as u32);
            }
            remaining -= span;
        }
        None
    }

    /// Ordinal position of `c` within the set.
    pub fn index_of(&self, c: char) -> Option<u64> {
        let cp = c as u32;
        let mut offset = 0u64;
        for &(lo, hi) in &self.intervals {
            if cp < lo {
                return None;
            }
            if cp <= hi {
                return Some(offset + (cp - lo) as u64);
            }
            offset += (hi - lo) as u64 + 1;
        }
        None
    }

    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        let mut all = self.intervals.clone();
        all.extend_from_slice(&other.intervals);
        IntervalSet::new(all)
    }

    pub fn intersect(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.intervals.len() && j < other.intervals.len() {
            let (a_lo, a_hi) = self.intervals[i];
            let (b_lo, b_hi) = other.intervals[j];
            let lo = a_lo.max(b_lo);
            let hi = a_hi.min(b_hi);
            if lo <= hi {
                out.push((lo, hi));
            }
            if a_hi < b_hi {
                i += 1;
            } else {
                j += 1;
            }
        }
        IntervalSet::new(out)
    }

    pub fn subtract(&self, other: &IntervalSet) -> IntervalSet {
        let mut out = Vec::new();
        let mut j = 0;
        for &(lo, hi) in &self.intervals {
            let mut cursor = lo;
            while j < other.intervals.len() && other.intervals[j].1 < cursor {
                j += 1;
            }
            let mut k = j;
            while k < other.intervals.len() && other.intervals[k].0 <= hi {
                let (b_lo, b_hi) = other.intervals[k];
                if cursor < b_lo {
                    out.push((cursor, b_lo - 1));
                }
                cursor = b_hi.saturating_add(1);
                if cursor > hi {
                    break;
                }
                k += 1;
            }
            if cursor <= hi {
                out.push((cursor, hi));
            }
        }
        IntervalSet::new(out)
    }

    /// All codepoints satisfying `pred`, built by a linear scan of the
    /// codepoint space. Expensive; callers cache the result.
    pub fn matching(pred: impl Fn(char) -> bool) -> IntervalSet {
        let mut out = Vec::new();
        let mut run_start: Option<u32> = None;
        let mut prev = 0u32;
        for cp in 0..=char::MAX as u32 {
            let ok = char::from_u32(cp).map(&pred).unwrap_or(false);
            match (ok, run_start) {
                (true, None) => run_start = Some(cp),
                (false, Some(start)) => {
                    out.push((start, prev));
                    run_start = None;
                }
                _ => {}
            }
            if ok {
                prev = cp;
            }
        }
        if let Some(start) = run_start {
            out.push((start, prev));
        }
        IntervalSet::new(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_adjacent_and_overlapping_ranges() {
        let s = IntervalSet::new(vec![(10, 20), (21, 30), (15, 25), (40, 40)]);
        assert_eq!(s.ranges(), &[(10, 30), (40, 40)]);
        assert_eq!(s.len(), 22);
    }

    #[test]
    fn indexing_round_trips() {
        let s = IntervalSet::new(vec![('a' as u32, 'c' as u32), ('x' as u32, 'z' as u32)]);
        assert_eq!(s.len(), 6);
        let chars: Vec<char> = (0..6).map(|i| s.char_at(i).unwrap()).collect();
        assert_eq!(chars, vec!['a', 'b', 'c', 'x', 'y', 'z']);
        for (i, c) in chars.iter().enumerate() {
            assert_eq!(s.index_of(*c), Some(i as u64));
        }
        assert_eq!(s.char_at(6), None);
        assert_eq!(s.index_of('d'), None);
    }

    #[test]
    fn contains_uses_binary_search_boundaries() {
        let s = IntervalSet::new(vec![('e' as u32, 'i' as u32), ('z' as u32, 'z' as u32)]);
        assert!(s.contains('e'));
        assert!(s.contains('i'));
        assert!(s.contains('z'));
        assert!(!s.contains('d'));
        assert!(!s.contains('j'));
        assert!(!s.contains('y'));
    }

    #[test]
    fn set_operations() {
        let a = IntervalSet::new(vec![(0, 10), (20, 30)]);
        let b = IntervalSet::new(vec![(5, 25)]);
        assert_eq!(a.intersect(&b).ranges(), &[(5, 10), (20, 25)]);
        assert_eq!(a.union(&b).ranges(), &[(0, 30)]);
        assert_eq!(a.subtract(&b).ranges(), &[(0, 4), (26, 30)]);
        assert!(a.intersect(&IntervalSet::empty()).is_empty());
    }

    #[test]
    fn matching_builds_runs() {
        let digits = IntervalSet::matching(|c| c.is_ascii_digit());
        assert_eq!(digits.ranges(), &[('0' as u32, '9' as u32)]);
    }
}
