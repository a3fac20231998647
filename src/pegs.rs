//! Per-channel peg timeline: forced pegs at known stimulus times merged with
//! intervals flagged by the detector.

use crate::error::{Result, SalpaError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PegKind {
    AutoDetected,
    /// Known stimulus; never interrupted by the zero-crossing rule.
    Forced,
}

/// Half-open sample range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PegInterval {
    pub start: u64,
    pub end: u64,
    pub kind: PegKind,
}

impl PegInterval {
    pub fn new(start: u64, end: u64, kind: PegKind) -> Self {
        Self { start, end, kind }
    }

    pub fn contains(&self, index: u64) -> bool {
        index >= self.start && index < self.end
    }

    pub fn is_forced(&self) -> bool {
        self.kind == PegKind::Forced
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Forced pegs every `period` samples starting at `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicPegs {
    pub period: u64,
    pub delay: u64,
}

/// Ordered, disjoint set of peg intervals for one channel.
///
/// Overlapping or touching intervals are merged into their union, which is
/// `Forced` if either side was.
#[derive(Debug, Clone)]
pub struct PegScheduler {
    intervals: VecDeque<PegInterval>,
    forcepeg: u64,
    next_emit: u64,
    periodic: Option<PeriodicPegs>,
    next_periodic: u64,
}

impl PegScheduler {
    pub fn new(forcepeg: u64) -> Self {
        Self {
            intervals: VecDeque::new(),
            forcepeg,
            next_emit: 0,
            periodic: None,
            next_periodic: 0,
        }
    }

    pub fn with_periodic(mut self, periodic: PeriodicPegs) -> Self {
        if periodic.period > 0 {
            self.next_periodic = periodic.delay;
            self.periodic = Some(periodic);
        }
        self
    }

    /// Add a forced peg `[start, start + max(duration, forcepeg))`.
    ///
    /// Fails for a zero duration, a start that has already been emitted, or
    /// an end past the last representable sample index.
    pub fn register_forced(&mut self, start: u64, duration: u64) -> Result<()> {
        if duration == 0 {
            return Err(SalpaError::ConfigError(format!(
                "Forced peg at sample {} has zero duration",
                start
            )));
        }
        if start < self.next_emit {
            return Err(SalpaError::ConfigError(format!(
                "Forced peg at sample {} is before the next output sample {}",
                start, self.next_emit
            )));
        }
        let len = duration.max(self.forcepeg);
        let end = start.checked_add(len).ok_or_else(|| {
            SalpaError::ConfigError(format!(
                "Forced peg at sample {} with duration {} runs past the last sample index",
                start, len
            ))
        })?;
        self.insert(PegInterval::new(start, end, PegKind::Forced));
        Ok(())
    }

    /// Flag a single corrupted sample.
    pub fn mark_corrupted(&mut self, index: u64) {
        self.insert(PegInterval::new(index, index + 1, PegKind::AutoDetected));
    }

    /// Materialise periodic pegs starting at or before `head`.
    pub fn extend_periodic(&mut self, head: u64) {
        let Some(p) = self.periodic else {
            return;
        };
        let len = self.forcepeg.max(1);
        while self.next_periodic <= head {
            let start = self.next_periodic;
            self.insert(PegInterval::new(start, start.saturating_add(len), PegKind::Forced));
            match start.checked_add(p.period) {
                Some(next) => self.next_periodic = next,
                None => {
                    self.periodic = None;
                    break;
                }
            }
        }
    }

    pub fn active_interval(&self, index: u64) -> Option<&PegInterval> {
        self.intervals
            .iter()
            .take_while(|p| p.start <= index)
            .find(|p| p.contains(index))
    }

    pub fn is_forced_at(&self, index: u64) -> bool {
        self.active_interval(index)
            .is_some_and(|p| p.is_forced())
    }

    /// Whether any interval intersects the inclusive range `[lo, hi]`.
    pub fn overlaps(&self, lo: u64, hi: u64) -> bool {
        self.intervals
            .iter()
            .take_while(|p| p.start <= hi)
            .any(|p| p.end > lo)
    }

    pub fn next_start_after(&self, index: u64) -> Option<u64> {
        self.intervals
            .iter()
            .map(|p| p.start)
            .find(|&s| s > index)
    }

    /// Drop intervals that end at or before `next_emit`; later forced pegs
    /// must start at or after it.
    pub fn retire_before(&mut self, next_emit: u64) {
        self.next_emit = self.next_emit.max(next_emit);
        while self
            .intervals
            .front()
            .is_some_and(|p| p.end <= self.next_emit)
        {
            self.intervals.pop_front();
        }
    }

    /// Clip every interval to end at or before `end` (end of stream).
    pub fn close_at(&mut self, end: u64) {
        self.intervals.retain(|p| p.start < end);
        for p in self.intervals.iter_mut() {
            p.end = p.end.min(end);
        }
        self.periodic = None;
    }

    pub fn intervals(&self) -> impl Iterator<Item = &PegInterval> {
        self.intervals.iter()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    fn insert(&mut self, mut peg: PegInterval) {
        let mut i = self.intervals.partition_point(|p| p.end < peg.start);
        while i < self.intervals.len() && self.intervals[i].start <= peg.end {
            if let Some(other) = self.intervals.remove(i) {
                peg.start = peg.start.min(other.start);
                peg.end = peg.end.max(other.end);
                if other.is_forced() {
                    peg.kind = PegKind::Forced;
                }
            }
        }
        self.intervals.insert(i, peg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(s: &PegScheduler) -> Vec<(u64, u64, PegKind)> {
        s.intervals().map(|p| (p.start, p.end, p.kind)).collect()
    }

    #[test]
    fn test_forced_respects_minimum_duration() {
        let mut s = PegScheduler::new(9);
        s.register_forced(100, 3).unwrap();
        s.register_forced(200, 20).unwrap();
        assert_eq!(
            spans(&s),
            vec![(100, 109, PegKind::Forced), (200, 220, PegKind::Forced)]
        );
    }

    #[test]
    fn test_rejects_zero_duration_and_past_pegs() {
        let mut s = PegScheduler::new(9);
        assert!(matches!(
            s.register_forced(10, 0),
            Err(SalpaError::ConfigError(_))
        ));
        s.retire_before(50);
        let err = s.register_forced(49, 5).unwrap_err();
        assert!(err.to_string().contains("before the next output sample 50"));
        assert!(s.register_forced(50, 5).is_ok());
    }

    #[test]
    fn test_rejects_peg_ending_past_index_range() {
        let mut s = PegScheduler::new(9);
        let err = s.register_forced(u64::MAX, 5).unwrap_err();
        assert!(matches!(err, SalpaError::ConfigError(_)));
        assert!(err.to_string().contains(&u64::MAX.to_string()), "{}", err);
        // The minimum duration alone can overflow too
        assert!(s.register_forced(u64::MAX - 3, 1).is_err());
        assert!(s.is_empty());
        assert!(s.register_forced(u64::MAX - 9, 9).is_ok());
    }

    #[test]
    fn test_overlapping_forced_and_auto_merge_forced() {
        let mut s = PegScheduler::new(1);
        for i in 95..103 {
            s.mark_corrupted(i);
        }
        s.register_forced(100, 10).unwrap();
        assert_eq!(spans(&s), vec![(95, 110, PegKind::Forced)]);
    }

    #[test]
    fn test_corruption_touching_forced_end_lengthens_it() {
        let mut s = PegScheduler::new(1);
        s.register_forced(10, 5).unwrap();
        s.mark_corrupted(15);
        s.mark_corrupted(16);
        assert_eq!(spans(&s), vec![(10, 17, PegKind::Forced)]);
        s.mark_corrupted(12);
        assert_eq!(spans(&s), vec![(10, 17, PegKind::Forced)]);
    }

    #[test]
    fn test_bridging_interval_merges_neighbours() {
        let mut s = PegScheduler::new(1);
        s.mark_corrupted(5);
        s.register_forced(20, 2).unwrap();
        s.register_forced(40, 2).unwrap();
        s.register_forced(6, 15).unwrap();
        assert_eq!(
            spans(&s),
            vec![(5, 22, PegKind::Forced), (40, 42, PegKind::Forced)]
        );
    }

    #[test]
    fn test_queries() {
        let mut s = PegScheduler::new(1);
        s.register_forced(10, 5).unwrap();
        s.mark_corrupted(30);

        assert!(s.active_interval(9).is_none());
        assert_eq!(s.active_interval(14).map(|p| p.start), Some(10));
        assert!(s.active_interval(15).is_none());
        assert!(s.is_forced_at(10));
        assert!(!s.is_forced_at(30));
        assert!(s.active_interval(30).is_some());

        assert!(s.overlaps(0, 10));
        assert!(!s.overlaps(15, 29));
        assert!(s.overlaps(29, 40));
        assert_eq!(s.next_start_after(10), Some(30));
        assert_eq!(s.next_start_after(30), None);
    }

    #[test]
    fn test_retire_and_close() {
        let mut s = PegScheduler::new(1);
        s.register_forced(10, 5).unwrap();
        s.register_forced(100, 50).unwrap();
        s.retire_before(15);
        assert_eq!(s.len(), 1);
        s.close_at(120);
        assert_eq!(spans(&s), vec![(100, 120, PegKind::Forced)]);
        s.close_at(100);
        assert!(s.is_empty());
    }

    #[test]
    fn test_periodic_pegs() {
        let mut s = PegScheduler::new(3).with_periodic(PeriodicPegs {
            period: 100,
            delay: 20,
        });
        s.extend_periodic(19);
        assert!(s.is_empty());
        s.extend_periodic(250);
        assert_eq!(
            spans(&s),
            vec![
                (20, 23, PegKind::Forced),
                (120, 123, PegKind::Forced),
                (220, 223, PegKind::Forced)
            ]
        );
        s.extend_periodic(250);
        assert_eq!(s.len(), 3);
    }
}
