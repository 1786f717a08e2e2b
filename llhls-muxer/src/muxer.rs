//! The live muxer: segment/fragment state machine plus blocking readers.
//!
//! A single producer feeds packets through [`LiveMuxer::write_packet`]; any
//! number of readers query the playlist, segments and fragments. Store,
//! cached playlist and both wait registries share one lock, so a reader that
//! finds its position missing is registered before the producer can publish
//! it.

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::{MuxerConfig, WakePolicy};
use crate::error::{MuxerError, MuxerResult};
use crate::packet::Packet;
use crate::playlist;
use crate::session::{FragmentTarget, IndexTarget, SessionId, WaitRegistry};
use crate::store::{Cursor, SegmentStore};

/// Result of a playlist request.
#[derive(Debug)]
pub enum IndexLookup {
    Ready(Arc<str>),
    Pending(PendingIndex),
}

/// A parked playlist request. The receiver yields the playlist that woke it.
#[derive(Debug)]
pub struct PendingIndex {
    pub session: SessionId,
    pub receiver: oneshot::Receiver<Arc<str>>,
}

/// Result of a part request.
#[derive(Debug)]
pub enum FragmentLookup {
    Ready(Vec<Packet>),
    Pending(PendingFragment),
}

/// A parked part request. The receiver only signals that some part finished;
/// the caller must query again.
#[derive(Debug)]
pub struct PendingFragment {
    pub session: SessionId,
    pub receiver: oneshot::Receiver<()>,
}

/// Point-in-time view of a muxer, for health and listing endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct MuxerStats {
    pub source_id: String,
    pub segments: usize,
    pub media_sequence_base: u64,
    pub current_msn: Option<u64>,
    pub current_part: Option<usize>,
    pub index_sessions: usize,
    pub fragment_sessions: usize,
    pub frame_rate: u32,
    pub closed: bool,
}

struct MuxerState {
    store: SegmentStore,
    playlist: Arc<str>,
    index_waiters: WaitRegistry<IndexTarget, Arc<str>>,
    fragment_waiters: WaitRegistry<FragmentTarget, ()>,
    closed: bool,
}

/// Whether a playlist request for `(msn, part)` can be answered at `cursor`.
///
/// `msn == -1` asks for the current playlist. Otherwise the position is
/// published once the cursor has moved past it.
#[must_use]
pub fn index_ready(cursor: Option<Cursor>, msn: i64, part: i64) -> bool {
    if msn < 0 {
        return true;
    }
    let Some(cursor) = cursor else {
        return false;
    };
    let current_msn = i64::try_from(cursor.msn).unwrap_or(i64::MAX);
    let current_part = i64::try_from(cursor.part).unwrap_or(i64::MAX);
    msn < current_msn || (msn == current_msn && part < current_part)
}

pub struct LiveMuxer {
    source_id: String,
    config: MuxerConfig,
    state: RwLock<MuxerState>,
    frame_rate: AtomicU32,
}

impl LiveMuxer {
    #[must_use]
    pub fn new(source_id: impl Into<String>, config: MuxerConfig) -> Self {
        let source_id = source_id.into();
        let store = SegmentStore::new(config.max_segments);
        let playlist: Arc<str> = Arc::from(playlist::render(&store, &source_id, &config));

        Self {
            source_id,
            config,
            state: RwLock::new(MuxerState {
                store,
                playlist,
                index_waiters: WaitRegistry::new(),
                fragment_waiters: WaitRegistry::new(),
                closed: false,
            }),
            frame_rate: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    #[must_use]
    pub const fn config(&self) -> &MuxerConfig {
        &self.config
    }

    /// Feed one packet. Must be called from a single producer, in arrival order.
    pub fn write_packet(&self, packet: Packet) -> MuxerResult<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if state.closed {
            return Err(MuxerError::SourceClosed(self.source_id.clone()));
        }

        let before = state.store.cursor();
        let mut wake_fragments = false;

        let starts_segment = packet.is_key_frame
            && state
                .store
                .current()
                .is_none_or(|segment| segment.duration() >= self.config.segment_min_duration());

        if starts_segment {
            let now = Utc::now();
            if let Some(closed) = state.store.close_current(now) {
                // A dropped trailing part also releases readers parked on it.
                wake_fragments = true;
                tracing::debug!(
                    source = %self.source_id,
                    sequence = closed.sequence,
                    duration_ms = closed.duration.as_millis() as u64,
                    "Closed segment"
                );
            }
            let (sequence, _) = state.store.open_segment(now);
            tracing::debug!(source = %self.source_id, sequence, "Opened segment");
        } else if state.store.current().is_none() {
            tracing::trace!(source = %self.source_id, "Dropping packet before first keyframe");
            return Ok(());
        }

        let policy = self.config.fragment_policy;
        if let Some(segment) = state.store.current_mut() {
            segment.push(packet);
            let complete = segment
                .last_fragment()
                .is_some_and(|fragment| policy.is_complete(fragment.len(), fragment.duration()));
            if complete {
                let duration = segment.cut_fragment();
                state.store.record_fragment(duration);
                wake_fragments = true;
            }
        }

        if state.store.cursor() != before {
            self.publish(state);
        }
        if wake_fragments && !state.fragment_waiters.is_empty() {
            let woken = state.fragment_waiters.wake_all(&());
            tracing::trace!(source = %self.source_id, woken, "Woke fragment sessions");
        }
        Ok(())
    }

    fn publish(&self, state: &mut MuxerState) {
        let playlist: Arc<str> =
            Arc::from(playlist::render(&state.store, &self.source_id, &self.config));
        state.playlist = Arc::clone(&playlist);

        if state.index_waiters.is_empty() {
            return;
        }
        let cursor = state.store.cursor();
        let woken = match self.config.wake_policy {
            WakePolicy::All => state.index_waiters.wake_all(&playlist),
            WakePolicy::Satisfied => state
                .index_waiters
                .wake_where(&playlist, |target| index_ready(cursor, target.msn, target.part)),
        };
        tracing::trace!(source = %self.source_id, woken, "Woke index sessions");
    }

    pub fn set_frame_rate(&self, fps: u32) {
        let previous = self.frame_rate.swap(fps, Ordering::Relaxed);
        if previous != fps {
            tracing::debug!(source = %self.source_id, fps, "Frame rate updated");
        }
    }

    #[must_use]
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate.load(Ordering::Relaxed)
    }

    /// Playlist for a blocking reload at `(msn, part)`.
    ///
    /// Negative `msn` means no blocking was requested. When the position is not
    /// published yet, a session is registered and must be either awaited or
    /// released with [`close_index_session`](Self::close_index_session).
    pub fn index(&self, msn: i64, part: i64) -> MuxerResult<IndexLookup> {
        if let Some(playlist) = self.ready_index(&self.state.read(), msn, part)? {
            return Ok(IndexLookup::Ready(playlist));
        }

        // The producer may have published between the two locks.
        let mut state = self.state.write();
        if let Some(playlist) = self.ready_index(&state, msn, part)? {
            return Ok(IndexLookup::Ready(playlist));
        }
        let (session, receiver) = state.index_waiters.register(IndexTarget { msn, part });
        tracing::trace!(source = %self.source_id, session = %session, msn, part, "Parked index request");
        Ok(IndexLookup::Pending(PendingIndex { session, receiver }))
    }

    fn ready_index(&self, state: &MuxerState, msn: i64, part: i64) -> MuxerResult<Option<Arc<str>>> {
        if state.closed {
            return Err(MuxerError::SourceClosed(self.source_id.clone()));
        }
        Ok(index_ready(state.store.cursor(), msn, part).then(|| Arc::clone(&state.playlist)))
    }

    /// All packets of segment `sequence`, including the segment still being written.
    pub fn segment(&self, sequence: u64) -> MuxerResult<Vec<Packet>> {
        let state = self.state.read();
        if state.closed {
            return Err(MuxerError::SourceClosed(self.source_id.clone()));
        }
        match state.store.get(sequence) {
            Some(segment) if segment.packet_count() > 0 => Ok(segment.packets()),
            _ => Err(MuxerError::SegmentNotFound(sequence)),
        }
    }

    /// Packets of part `index` of segment `sequence`.
    ///
    /// A finished part is returned directly. An unfinished one registers a
    /// session that is signalled whenever any part finishes.
    pub fn fragment(&self, sequence: u64, index: usize) -> MuxerResult<FragmentLookup> {
        if let Some(packets) = self.finished_fragment(&self.state.read(), sequence, index)? {
            return Ok(FragmentLookup::Ready(packets));
        }

        let mut state = self.state.write();
        if let Some(packets) = self.finished_fragment(&state, sequence, index)? {
            return Ok(FragmentLookup::Ready(packets));
        }
        let (session, receiver) = state.fragment_waiters.register(FragmentTarget {
            segment: sequence,
            fragment: index,
        });
        tracing::trace!(source = %self.source_id, session = %session, sequence, index, "Parked fragment request");
        Ok(FragmentLookup::Pending(PendingFragment { session, receiver }))
    }

    /// Packets of a finished part, `None` while it is still open.
    fn finished_fragment(
        &self,
        state: &MuxerState,
        sequence: u64,
        index: usize,
    ) -> MuxerResult<Option<Vec<Packet>>> {
        if state.closed {
            return Err(MuxerError::SourceClosed(self.source_id.clone()));
        }
        let fragment = state
            .store
            .get(sequence)
            .and_then(|segment| segment.fragment(index))
            .ok_or(MuxerError::FragmentNotFound {
                segment: sequence,
                fragment: index,
            })?;
        Ok(fragment
            .is_finished()
            .then(|| fragment.packets().to_vec()))
    }

    pub fn close_index_session(&self, session: &SessionId) -> bool {
        self.state.write().index_waiters.remove(session)
    }

    pub fn close_fragment_session(&self, session: &SessionId) -> bool {
        self.state.write().fragment_waiters.remove(session)
    }

    /// Wait up to the index timeout for the playlist at `(msn, part)`.
    pub async fn wait_index(&self, msn: i64, part: i64) -> MuxerResult<Arc<str>> {
        let pending = match self.index(msn, part)? {
            IndexLookup::Ready(playlist) => return Ok(playlist),
            IndexLookup::Pending(pending) => pending,
        };

        let timeout = self.config.index_wait_timeout();
        let _guard = SessionGuard::index(self, pending.session);
        match tokio::time::timeout(timeout, pending.receiver).await {
            Ok(Ok(playlist)) => Ok(playlist),
            Ok(Err(_)) => Err(MuxerError::SourceClosed(self.source_id.clone())),
            Err(_) => {
                tracing::warn!(source = %self.source_id, msn, part, "Index request timed out");
                Err(MuxerError::IndexTimeout(timeout))
            }
        }
    }

    /// Wait up to the fragment timeout for part `index` of segment `sequence`.
    ///
    /// Wakes are not targeted, so the part is looked up again after each one
    /// and the request parks again until the deadline.
    pub async fn wait_fragment(&self, sequence: u64, index: usize) -> MuxerResult<Vec<Packet>> {
        let timeout = self.config.fragment_wait_timeout();
        let deadline = Instant::now() + timeout;

        loop {
            let pending = match self.fragment(sequence, index)? {
                FragmentLookup::Ready(packets) => return Ok(packets),
                FragmentLookup::Pending(pending) => pending,
            };

            let _guard = SessionGuard::fragment(self, pending.session);
            match tokio::time::timeout_at(deadline, pending.receiver).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(MuxerError::SourceClosed(self.source_id.clone())),
                Err(_) => {
                    tracing::warn!(source = %self.source_id, sequence, index, "Fragment request timed out");
                    return Err(MuxerError::FragmentTimeout(timeout));
                }
            }
        }
    }

    /// Tear down: drop every parked session and refuse further reads and writes.
    pub fn close(&self) {
        let mut state = self.state.write();
        if state.closed {
            return;
        }
        state.closed = true;
        let index_sessions = state.index_waiters.len();
        let fragment_sessions = state.fragment_waiters.len();
        state.index_waiters.clear();
        state.fragment_waiters.clear();
        tracing::info!(
            source = %self.source_id,
            index_sessions,
            fragment_sessions,
            "Muxer closed"
        );
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Last rendered playlist.
    #[must_use]
    pub fn playlist(&self) -> Arc<str> {
        Arc::clone(&self.state.read().playlist)
    }

    #[must_use]
    pub fn cursor(&self) -> Option<Cursor> {
        self.state.read().store.cursor()
    }

    #[must_use]
    pub fn media_sequence_base(&self) -> u64 {
        self.state.read().store.media_sequence_base()
    }

    #[must_use]
    pub fn index_session_count(&self) -> usize {
        self.state.read().index_waiters.len()
    }

    #[must_use]
    pub fn fragment_session_count(&self) -> usize {
        self.state.read().fragment_waiters.len()
    }

    /// Run `f` against the segment store under the shared lock.
    pub fn with_store<R>(&self, f: impl FnOnce(&SegmentStore) -> R) -> R {
        f(&self.state.read().store)
    }

    #[must_use]
    pub fn stats(&self) -> MuxerStats {
        let state = self.state.read();
        let cursor = state.store.cursor();
        MuxerStats {
            source_id: self.source_id.clone(),
            segments: state.store.len(),
            media_sequence_base: state.store.media_sequence_base(),
            current_msn: cursor.map(|c| c.msn),
            current_part: cursor.map(|c| c.part),
            index_sessions: state.index_waiters.len(),
            fragment_sessions: state.fragment_waiters.len(),
            frame_rate: self.frame_rate(),
            closed: state.closed,
        }
    }
}

enum SessionKind {
    Index,
    Fragment,
}

/// Removes a parked session when the waiting future finishes or is dropped.
struct SessionGuard<'a> {
    muxer: &'a LiveMuxer,
    session: SessionId,
    kind: SessionKind,
}

impl<'a> SessionGuard<'a> {
    fn index(muxer: &'a LiveMuxer, session: SessionId) -> Self {
        Self {
            muxer,
            session,
            kind: SessionKind::Index,
        }
    }

    fn fragment(muxer: &'a LiveMuxer, session: SessionId) -> Self {
        Self {
            muxer,
            session,
            kind: SessionKind::Fragment,
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        match self.kind {
            SessionKind::Index => self.muxer.close_index_session(&self.session),
            SessionKind::Fragment => self.muxer.close_fragment_session(&self.session),
        };
    }
}
