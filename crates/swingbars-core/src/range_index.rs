//! Per-series coverage bookkeeping.
//!
//! Each series maps to a sorted list of disjoint, non-adjacent [`CachedRange`]s.
//! Two ranges are adjacent when one starts exactly one resolution step after
//! the other ends; adjacent or overlapping ranges are coalesced on insert, so
//! the stored list is always the minimal representation of the covered set.

use std::collections::HashMap;
use std::sync::RwLock;

use time::Duration;

use crate::domain::{CachedRange, SeriesKey, UtcDateTime};
use crate::InvalidRangeError;

/// In-memory coverage index shared by every request of a data manager.
#[derive(Debug, Default)]
pub struct RangeIndex {
    entries: RwLock<HashMap<SeriesKey, Vec<CachedRange>>>,
}

impl RangeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current coverage of `key`, ascending. Empty when nothing is cached.
    pub fn covered(&self, key: &SeriesKey) -> Vec<CachedRange> {
        self.entries
            .read()
            .expect("range index lock is not poisoned")
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Maximal sub-intervals of `[start, end]` not covered for `key`, ascending.
    pub fn gaps(
        &self,
        key: &SeriesKey,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<Vec<CachedRange>, InvalidRangeError> {
        let requested = CachedRange::new(start, end)?;
        let entries = self.entries.read().expect("range index lock is not poisoned");
        let covered = entries.get(key).map(Vec::as_slice).unwrap_or_default();
        Ok(complement(covered, requested, key.resolution.step()))
    }

    /// Record `[start, end]` as covered and return the coalesced coverage.
    ///
    /// Marking an already covered interval leaves the coverage unchanged.
    pub fn mark_covered(
        &self,
        key: &SeriesKey,
        start: UtcDateTime,
        end: UtcDateTime,
    ) -> Result<Vec<CachedRange>, InvalidRangeError> {
        let range = CachedRange::new(start, end)?;
        Ok(self.mark_range(key, range))
    }

    pub(crate) fn mark_range(&self, key: &SeriesKey, range: CachedRange) -> Vec<CachedRange> {
        let mut entries = self.entries.write().expect("range index lock is not poisoned");
        let ranges = entries.entry(key.clone()).or_default();
        ranges.push(range);
        *ranges = coalesce(std::mem::take(ranges), key.resolution.step());
        ranges.clone()
    }

    /// Replace the coverage of `key` with `ranges`, coalescing as needed.
    pub fn restore(&self, key: &SeriesKey, ranges: Vec<CachedRange>) {
        let ranges = coalesce(ranges, key.resolution.step());
        let mut entries = self.entries.write().expect("range index lock is not poisoned");
        if ranges.is_empty() {
            entries.remove(key);
        } else {
            entries.insert(key.clone(), ranges);
        }
    }

    /// Every series with recorded coverage.
    pub fn keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = self
            .entries
            .read()
            .expect("range index lock is not poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

/// Sort and merge overlapping or adjacent ranges.
fn coalesce(mut ranges: Vec<CachedRange>, step: Duration) -> Vec<CachedRange> {
    ranges.sort();
    let mut merged: Vec<CachedRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if touches(last, &range, step) => last.extend_to(range.end()),
            _ => merged.push(range),
        }
    }
    merged
}

/// `next` starts no later than one step after `prev` ends. Requires `prev.start <= next.start`.
fn touches(prev: &CachedRange, next: &CachedRange, step: Duration) -> bool {
    match prev.end().checked_add(step) {
        Some(boundary) => next.start() <= boundary,
        None => true,
    }
}

fn complement(covered: &[CachedRange], requested: CachedRange, step: Duration) -> Vec<CachedRange> {
    let mut gaps = Vec::new();
    let mut cursor = requested.start();

    for range in covered {
        if range.end() < cursor {
            continue;
        }
        if range.start() > requested.end() {
            break;
        }
        if range.start() > cursor {
            let gap_end = range
                .start()
                .checked_sub(step)
                .map_or(cursor, |before| before.min(requested.end()));
            if let Ok(gap) = CachedRange::new(cursor, gap_end) {
                gaps.push(gap);
            }
        }
        match range.end().checked_add(step) {
            Some(next) => cursor = next,
            None => return gaps,
        }
        if cursor > requested.end() {
            return gaps;
        }
    }

    if let Ok(tail) = CachedRange::new(cursor, requested.end()) {
        gaps.push(tail);
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Resolution, Symbol};

    fn key() -> SeriesKey {
        SeriesKey::new(Symbol::parse("AAPL").expect("symbol"), Resolution::Daily)
    }

    fn day(n: u8) -> UtcDateTime {
        UtcDateTime::parse(&format!("2024-01-{n:02}")).expect("day")
    }

    fn range(a: u8, b: u8) -> CachedRange {
        CachedRange::new(day(a), day(b)).expect("range")
    }

    #[test]
    fn unknown_series_has_one_gap_equal_to_request() {
        let index = RangeIndex::new();
        assert_eq!(index.gaps(&key(), day(3), day(9)).expect("gaps"), vec![range(3, 9)]);
        assert!(index.covered(&key()).is_empty());
    }

    #[test]
    fn adjacent_ranges_coalesce() {
        let index = RangeIndex::new();
        index.mark_covered(&key(), day(1), day(10)).expect("mark");
        let covered = index.mark_covered(&key(), day(11), day(20)).expect("mark");
        assert_eq!(covered, vec![range(1, 20)]);
    }

    #[test]
    fn overlapping_and_contained_ranges_coalesce() {
        let index = RangeIndex::new();
        index.mark_covered(&key(), day(5), day(8)).expect("mark");
        index.mark_covered(&key(), day(1), day(3)).expect("mark");
        index.mark_covered(&key(), day(2), day(6)).expect("mark");
        index.mark_covered(&key(), day(4), day(4)).expect("mark");
        assert_eq!(index.covered(&key()), vec![range(1, 8)]);
    }

    #[test]
    fn gaps_are_maximal_and_ordered() {
        let index = RangeIndex::new();
        index.mark_covered(&key(), day(5), day(10)).expect("mark");
        index.mark_covered(&key(), day(15), day(20)).expect("mark");

        let gaps = index.gaps(&key(), day(1), day(25)).expect("gaps");
        assert_eq!(gaps, vec![range(1, 4), range(11, 14), range(21, 25)]);
    }

    #[test]
    fn fully_covered_request_has_no_gaps() {
        let index = RangeIndex::new();
        index.mark_covered(&key(), day(1), day(20)).expect("mark");
        assert!(index.gaps(&key(), day(3), day(17)).expect("gaps").is_empty());
        assert!(index.gaps(&key(), day(20), day(20)).expect("gaps").is_empty());
    }

    #[test]
    fn request_partially_overlapping_edges() {
        let index = RangeIndex::new();
        index.mark_covered(&key(), day(10), day(15)).expect("mark");
        assert_eq!(
            index.gaps(&key(), day(12), day(18)).expect("gaps"),
            vec![range(16, 18)]
        );
        assert_eq!(
            index.gaps(&key(), day(8), day(12)).expect("gaps"),
            vec![range(8, 9)]
        );
    }

    #[test]
    fn inverted_request_is_rejected() {
        let index = RangeIndex::new();
        assert!(matches!(
            index.gaps(&key(), day(9), day(3)),
            Err(InvalidRangeError::Inverted { .. })
        ));
        assert!(index.mark_covered(&key(), day(9), day(3)).is_err());
        assert!(index.keys().is_empty());
    }

    #[test]
    fn restore_coalesces_persisted_ranges() {
        let index = RangeIndex::new();
        index.restore(&key(), vec![range(11, 20), range(1, 10), range(25, 26)]);
        assert_eq!(index.covered(&key()), vec![range(1, 20), range(25, 26)]);
        assert_eq!(index.keys(), vec![key()]);
    }
}
