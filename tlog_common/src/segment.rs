//! The persisted chunk a segment producer writes and a segment consumer reads.

use crate::datom::TxEntry;
use crate::eid::Eid;
use crate::value::Keyword;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A durable, contiguous slice of the source log with embedded side-tables.
///
/// `start_t <= end_t`, both inclusive, both real `t` values observed in the
/// log. `transactions` is ordered by `t` and its first/last entries carry
/// exactly `start_t`/`end_t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_t: u64,
    pub end_t: u64,
    /// Source EIDs that name reference-typed attributes.
    pub refs: HashSet<Eid>,
    /// Snapshot of source `EID -> ident` for base-schema attributes, taken
    /// before any user schema existed.
    pub id_to_attr: HashMap<Eid, Keyword>,
    pub transactions: Vec<TxEntry>,
}

/// The `(start_t, end_t)` key identifying one segment, the unit the store's
/// `list`/`last` capabilities deal in without paying to load the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentRange {
    pub start_t: u64,
    pub end_t: u64,
}

impl Segment {
    /// Derive the `(start_t, end_t)` key from the payload's observed bounds.
    pub fn range(&self) -> SegmentRange {
        SegmentRange {
            start_t: self.start_t,
            end_t: self.end_t,
        }
    }

    /// `true` if `t` falls within this segment's inclusive bounds.
    pub fn contains(&self, t: u64) -> bool {
        t >= self.start_t && t <= self.end_t
    }

    /// The largest `t` actually carried by `transactions` (may be less than
    /// `end_t` header if a log read came back short, see §4.5 step 5
    /// `partial_segment`).
    pub fn last_contained_t(&self) -> Option<u64> {
        self.transactions.last().map(|tx| tx.t)
    }
}

/// A gap between two adjacent segments in a sorted segment list: the
/// inclusive range of `t` that no stored segment covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub start_t: u64,
    pub end_t: u64,
}

/// Find gaps in a sorted-by-`start_t` list of segment ranges. A gap is any
/// `(prev.end_t+1, next.start_t-1)` where `next.start_t > prev.end_t+1`.
/// Overlaps are ignored here (the spec says they are logged, not repaired;
/// logging is the caller's job since it has a tracing span).
pub fn find_gaps(sorted: &[SegmentRange]) -> Vec<Gap> {
    let mut gaps = Vec::new();
    for pair in sorted.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if next.start_t > prev.end_t + 1 {
            gaps.push(Gap {
                start_t: prev.end_t + 1,
                end_t: next.start_t - 1,
            });
        }
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u64, end: u64) -> SegmentRange {
        SegmentRange {
            start_t: start,
            end_t: end,
        }
    }

    #[test]
    fn no_gaps_when_contiguous() {
        let segs = vec![range(1, 105), range(106, 118)];
        assert!(find_gaps(&segs).is_empty());
    }

    #[test]
    fn gaps_between_sparse_segments() {
        let segs = vec![range(1, 105), range(110, 118), range(146, 163)];
        let gaps = find_gaps(&segs);
        assert_eq!(
            gaps,
            vec![
                Gap {
                    start_t: 106,
                    end_t: 109
                },
                Gap {
                    start_t: 119,
                    end_t: 145
                },
            ]
        );
    }

    #[test]
    fn overlap_produces_no_gap() {
        let segs = vec![range(1, 105), range(100, 200)];
        assert!(find_gaps(&segs).is_empty());
    }

    #[test]
    fn segment_contains_and_last_t() {
        let seg = Segment {
            start_t: 5,
            end_t: 10,
            refs: HashSet::new(),
            id_to_attr: HashMap::new(),
            transactions: vec![],
        };
        assert!(seg.contains(5));
        assert!(seg.contains(10));
        assert!(!seg.contains(11));
        assert_eq!(seg.last_contained_t(), None);
    }

    proptest::proptest! {
        /// For any sorted, non-overlapping segment list, the gaps found
        /// plus the segments themselves tile `[first.start_t, last.end_t]`
        /// with no `t` left uncovered and none covered twice.
        #[test]
        fn gaps_and_segments_tile_the_range(
            starts in proptest::collection::vec(1u64..50, 2..12),
        ) {
            let mut t = 0u64;
            let mut segs = Vec::new();
            for width in starts {
                let start = t + 1;
                let end = start + (width % 20);
                segs.push(range(start, end));
                t = end + (width % 5); // 0 leaves segments touching/adjacent
            }

            let gaps = find_gaps(&segs);

            for w in segs.windows(2) {
                let (prev, next) = (w[0], w[1]);
                if next.start_t <= prev.end_t + 1 {
                    continue;
                }
                assert!(gaps.iter().any(|g| g.start_t == prev.end_t + 1
                    && g.end_t == next.start_t - 1));
            }

            for g in &gaps {
                assert!(g.start_t <= g.end_t);
                assert!(!segs.iter().any(|s| s.contains_t(g.start_t) || s.contains_t(g.end_t)));
            }
        }
    }

    impl SegmentRange {
        fn contains_t(&self, t: u64) -> bool {
            t >= self.start_t && t <= self.end_t
        }
    }
}
