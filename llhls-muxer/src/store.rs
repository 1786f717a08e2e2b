use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::segment::Segment;

/// Write position of the muxer: the open segment and its highest fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub msn: u64,
    pub part: usize,
}

/// Outcome of finalising the open segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedSegment {
    pub sequence: u64,
    pub duration: Duration,
}

/// Bounded window of recent segments keyed by sequence number.
///
/// Sequence numbers are handed out monotonically and never reused. When a new
/// segment pushes the window past `max_segments`, the oldest one is evicted
/// and `media_sequence_base` is incremented, so the base always equals the
/// number of evictions so far.
#[derive(Debug)]
pub struct SegmentStore {
    segments: BTreeMap<u64, Segment>,
    current: Option<u64>,
    next_sequence: u64,
    media_sequence_base: u64,
    max_segments: usize,
    last_segment_duration: Option<Duration>,
    last_fragment_duration: Option<Duration>,
}

impl SegmentStore {
    #[must_use]
    pub fn new(max_segments: usize) -> Self {
        Self {
            segments: BTreeMap::new(),
            current: None,
            next_sequence: 0,
            media_sequence_base: 0,
            max_segments: max_segments.max(1),
            last_segment_duration: None,
            last_fragment_duration: None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub const fn media_sequence_base(&self) -> u64 {
        self.media_sequence_base
    }

    #[must_use]
    pub fn get(&self, sequence: u64) -> Option<&Segment> {
        self.segments.get(&sequence)
    }

    /// Retained segments, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Segment> + ExactSizeIterator {
        self.segments.values()
    }

    #[must_use]
    pub fn current(&self) -> Option<&Segment> {
        self.current.and_then(|sequence| self.segments.get(&sequence))
    }

    pub(crate) fn current_mut(&mut self) -> Option<&mut Segment> {
        match self.current {
            Some(sequence) => self.segments.get_mut(&sequence),
            None => None,
        }
    }

    #[must_use]
    pub fn cursor(&self) -> Option<Cursor> {
        self.current().map(|segment| Cursor {
            msn: segment.sequence(),
            part: segment.last_fragment_index(),
        })
    }

    /// Duration of the most recently finalised segment.
    #[must_use]
    pub const fn last_segment_duration(&self) -> Option<Duration> {
        self.last_segment_duration
    }

    /// Duration of the most recently finished fragment.
    #[must_use]
    pub const fn last_fragment_duration(&self) -> Option<Duration> {
        self.last_fragment_duration
    }

    pub(crate) fn record_fragment(&mut self, duration: Duration) {
        self.last_fragment_duration = Some(duration);
    }

    /// Finalise the open segment, if there is one.
    pub(crate) fn close_current(&mut self, now: DateTime<Utc>) -> Option<ClosedSegment> {
        let segment = self.current_mut()?;
        let finished_fragment = segment.close(now);
        let closed = ClosedSegment {
            sequence: segment.sequence(),
            duration: segment.duration(),
        };

        if let Some(duration) = finished_fragment {
            self.last_fragment_duration = Some(duration);
        }
        self.last_segment_duration = Some(closed.duration);
        self.current = None;
        Some(closed)
    }

    /// Open the next segment and evict beyond the window.
    ///
    /// Returns the new sequence number and the evicted ones. The caller must
    /// have closed the previous segment first.
    pub(crate) fn open_segment(&mut self, now: DateTime<Utc>) -> (u64, Vec<u64>) {
        debug_assert!(self.current.is_none(), "open segment while one is still open");

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.segments.insert(sequence, Segment::open(sequence, now));
        self.current = Some(sequence);

        let mut evicted = Vec::new();
        while self.segments.len() > self.max_segments {
            match self.segments.pop_first() {
                Some((old, _)) => {
                    self.media_sequence_base += 1;
                    evicted.push(old);
                }
                None => break,
            }
        }

        if !evicted.is_empty() {
            tracing::debug!(
                evicted = ?evicted,
                media_sequence_base = self.media_sequence_base,
                "Evicted segments from window"
            );
        }

        (sequence, evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use bytes::Bytes;

    fn fill(store: &mut SegmentStore, packets: usize) {
        let segment = store.current_mut().unwrap();
        for i in 0..packets {
            segment.push(Packet::new(
                i == 0,
                Duration::from_millis(40),
                Bytes::from_static(b"x"),
            ));
        }
    }

    #[test]
    fn test_empty_store() {
        let store = SegmentStore::new(6);

        assert!(store.is_empty());
        assert!(store.current().is_none());
        assert!(store.cursor().is_none());
        assert_eq!(store.media_sequence_base(), 0);
    }

    #[test]
    fn test_open_and_close() {
        let mut store = SegmentStore::new(6);
        let (seq, evicted) = store.open_segment(Utc::now());
        fill(&mut store, 3);

        assert_eq!(seq, 0);
        assert!(evicted.is_empty());
        assert_eq!(store.cursor(), Some(Cursor { msn: 0, part: 0 }));

        let closed = store.close_current(Utc::now()).unwrap();
        assert_eq!(closed.sequence, 0);
        assert_eq!(closed.duration, Duration::from_millis(120));
        assert!(store.current().is_none());
        assert!(store.get(0).unwrap().is_finished());
        assert_eq!(store.last_segment_duration(), Some(Duration::from_millis(120)));
        assert_eq!(store.last_fragment_duration(), Some(Duration::from_millis(120)));
    }

    #[test]
    fn test_window_eviction_counts() {
        let mut store = SegmentStore::new(3);

        for i in 0..10u64 {
            store.close_current(Utc::now());
            let (seq, evicted) = store.open_segment(Utc::now());
            fill(&mut store, 1);

            assert_eq!(seq, i);
            assert!(store.len() <= 3);
            if i >= 3 {
                assert_eq!(evicted, vec![i - 3]);
            }
            assert_eq!(store.media_sequence_base(), i.saturating_sub(2));
        }

        let retained: Vec<_> = store.iter().map(Segment::sequence).collect();
        assert_eq!(retained, vec![7, 8, 9]);
        assert!(store.get(6).is_none());
    }

    #[test]
    fn test_sequence_numbers_never_reused() {
        let mut store = SegmentStore::new(1);

        let (first, _) = store.open_segment(Utc::now());
        store.close_current(Utc::now());
        let (second, evicted) = store.open_segment(Utc::now());

        assert_eq!(first, 0);
        assert_eq!(second, 1);
        assert_eq!(evicted, vec![0]);
        assert_eq!(store.current().map(Segment::sequence), Some(1));
    }
}
