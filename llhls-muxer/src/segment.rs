//! Buffered media units.
//!
//! A [`Segment`] starts at a keyframe and is split into [`Fragment`]s (LL-HLS
//! parts). Only the state machine in `muxer` mutates them; once `finished` is
//! set, packets and duration never change again.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::packet::Packet;

/// One part of a segment.
#[derive(Debug, Clone)]
pub struct Fragment {
    duration: Duration,
    finished: bool,
    independent: bool,
    packets: Vec<Packet>,
}

impl Fragment {
    fn new(independent: bool) -> Self {
        Self {
            duration: Duration::ZERO,
            finished: false,
            independent,
            packets: Vec::new(),
        }
    }

    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// True only for the first part of a segment, which starts on a keyframe.
    #[must_use]
    pub const fn is_independent(&self) -> bool {
        self.independent
    }

    #[must_use]
    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    fn push(&mut self, packet: Packet) {
        debug_assert!(!self.finished, "write into finished fragment");
        self.duration += packet.duration;
        self.packets.push(packet);
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

/// A keyframe-aligned unit of media identified by its sequence number.
#[derive(Debug, Clone)]
pub struct Segment {
    sequence: u64,
    finished: bool,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    duration: Duration,
    fragments: Vec<Fragment>,
}

impl Segment {
    /// Open a segment with an empty, independent fragment 0.
    pub(crate) fn open(sequence: u64, now: DateTime<Utc>) -> Self {
        Self {
            sequence,
            finished: false,
            created_at: now,
            closed_at: None,
            duration: Duration::ZERO,
            fragments: vec![Fragment::new(true)],
        }
    }

    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Wall clock stamp taken when the segment was finalised.
    #[must_use]
    pub const fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    #[must_use]
    pub fn fragment(&self, index: usize) -> Option<&Fragment> {
        self.fragments.get(index)
    }

    /// Index of the highest fragment, the one being written while the segment is open.
    #[must_use]
    pub fn last_fragment_index(&self) -> usize {
        self.fragments.len().saturating_sub(1)
    }

    /// First unfinished fragment, if any.
    #[must_use]
    pub fn open_fragment(&self) -> Option<(usize, &Fragment)> {
        self.fragments
            .iter()
            .enumerate()
            .find(|(_, fragment)| !fragment.is_finished())
    }

    /// All packets of the segment in fragment order.
    #[must_use]
    pub fn packets(&self) -> Vec<Packet> {
        let total = self.fragments.iter().map(Fragment::len).sum();
        let mut packets = Vec::with_capacity(total);
        for fragment in &self.fragments {
            packets.extend_from_slice(fragment.packets());
        }
        packets
    }

    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.fragments.iter().map(Fragment::len).sum()
    }

    pub(crate) fn push(&mut self, packet: Packet) {
        debug_assert!(!self.finished, "write into finished segment");
        self.duration += packet.duration;
        if let Some(fragment) = self.fragments.last_mut() {
            fragment.push(packet);
        }
    }

    pub(crate) fn last_fragment(&self) -> Option<&Fragment> {
        self.fragments.last()
    }

    /// Finish the open fragment and start the next one. Returns the duration
    /// of the fragment that was just finished.
    pub(crate) fn cut_fragment(&mut self) -> Duration {
        let duration = match self.fragments.last_mut() {
            Some(fragment) => {
                fragment.finish();
                fragment.duration()
            }
            None => Duration::ZERO,
        };
        self.fragments.push(Fragment::new(false));
        duration
    }

    /// Finalise the segment.
    ///
    /// An empty trailing fragment (opened by the last cut, never written) is
    /// dropped; a non-empty one is finished. Returns the duration of the
    /// fragment finished here, if one was.
    pub(crate) fn close(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        let mut finished_now = None;
        if self.fragments.len() > 1 && self.fragments.last().is_some_and(Fragment::is_empty) {
            self.fragments.pop();
        } else if let Some(fragment) = self.fragments.last_mut() {
            if !fragment.is_finished() {
                fragment.finish();
                finished_now = Some(fragment.duration());
            }
        }
        self.finished = true;
        self.closed_at = Some(now);
        finished_now
    }
}
