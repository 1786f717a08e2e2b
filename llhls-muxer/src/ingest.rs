//! Ingestion adapter between an upstream decoder and a [`LiveMuxer`].
//!
//! The upstream side pushes [`IngestEvent`]s into a bounded channel. The
//! [`Ingestor`] task waits for the first keyframe, assigns packet durations
//! according to the configured [`FrameRateMode`], keeps codec parameters on
//! the [`LiveSource`] and ends with [`MuxerError::NoVideo`] if keyframes stop
//! arriving.
//!
//! [`LiveMuxer`]: crate::muxer::LiveMuxer

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{MuxerError, MuxerResult};
use crate::packet::{CodecParameters, Packet};
use crate::registry::LiveSource;

/// Capacity of the per-source ingest channel.
pub const INGEST_CHANNEL_CAPACITY: usize = 256;
/// Default time without a keyframe after which ingestion gives up.
pub const DEFAULT_KEYFRAME_TIMEOUT_MS: u64 = 20_000;
/// Minimum length of a frame-rate probe window.
pub const PROBE_WINDOW: Duration = Duration::from_secs(1);

pub type IngestSender = mpsc::Sender<IngestEvent>;
pub type IngestReceiver = mpsc::Receiver<IngestEvent>;

#[derive(Debug, Clone)]
pub enum IngestEvent {
    Packet(Packet),
    /// New parameter sets, e.g. after an in-band SPS change.
    CodecUpdate(CodecParameters),
    /// Frame rate reported by the upstream session (SDP or SPS timing info).
    FrameRate(u32),
}

/// How packet durations are determined before they reach the muxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FrameRateMode {
    /// Keep the durations the upstream computed from timestamps.
    #[default]
    Pts,
    /// Constant rate.
    Fixed { fps: u32 },
    /// Rate from [`IngestEvent::FrameRate`]; packets are held back until one arrives.
    Reported,
    /// Measure the rate over keyframe-bounded windows before writing.
    ///
    /// Writing starts on the keyframe that closes the second window of at
    /// least one second, not after a third window.
    Probe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub frame_rate: FrameRateMode,
    pub keyframe_timeout_ms: u64,
    pub ingest_channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_rate: FrameRateMode::default(),
            keyframe_timeout_ms: DEFAULT_KEYFRAME_TIMEOUT_MS,
            ingest_channel_capacity: INGEST_CHANNEL_CAPACITY,
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub const fn keyframe_timeout(&self) -> Duration {
        Duration::from_millis(self.keyframe_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), MuxerError> {
        if let FrameRateMode::Fixed { fps: 0 } = self.frame_rate {
            return Err(MuxerError::InvalidConfig(
                "frame_rate.fps must be positive".to_string(),
            ));
        }
        if self.keyframe_timeout_ms == 0 {
            return Err(MuxerError::InvalidConfig(
                "keyframe_timeout_ms must be positive".to_string(),
            ));
        }
        if self.ingest_channel_capacity == 0 {
            return Err(MuxerError::InvalidConfig(
                "ingest_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Frame-rate estimator over keyframe-bounded windows of at least [`PROBE_WINDOW`].
///
/// The first window is discarded; the second one yields the estimate.
#[derive(Debug, Default)]
pub struct FrameRateProbe {
    windows: u32,
    frames: u32,
    elapsed: Duration,
    estimate: Option<u32>,
}

impl FrameRateProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn estimate(&self) -> Option<u32> {
        self.estimate
    }

    /// Account for one packet. Returns the estimate once it is known.
    pub fn observe(&mut self, packet: &Packet) -> Option<u32> {
        if self.estimate.is_some() {
            return self.estimate;
        }

        if packet.is_key_frame && self.elapsed >= PROBE_WINDOW {
            self.windows += 1;
            if self.windows == 2 {
                let fps = (f64::from(self.frames) / self.elapsed.as_secs_f64()).round() as u32;
                self.estimate = Some(fps.max(1));
                return self.estimate;
            }
            self.frames = 0;
            self.elapsed = Duration::ZERO;
        }

        self.frames += 1;
        self.elapsed += packet.duration;
        None
    }
}

/// Drains one source's ingest channel into its muxer.
pub struct Ingestor {
    source: Arc<LiveSource>,
    config: StreamConfig,
    receiver: IngestReceiver,
    started: bool,
    reported_fps: u32,
    probe: FrameRateProbe,
}

impl Ingestor {
    #[must_use]
    pub fn new(source: Arc<LiveSource>, config: StreamConfig, receiver: IngestReceiver) -> Self {
        Self {
            source,
            config,
            receiver,
            started: false,
            reported_fps: 0,
            probe: FrameRateProbe::new(),
        }
    }

    /// Run until the channel closes, the muxer is closed, or no keyframe
    /// arrives within the keyframe timeout.
    pub async fn run(mut self) -> MuxerResult<()> {
        let source_id = self.source.id().to_string();
        let timeout = self.config.keyframe_timeout();
        let watchdog = tokio::time::sleep(timeout);
        tokio::pin!(watchdog);

        tracing::info!(source = %source_id, mode = ?self.config.frame_rate, "Ingest started");

        loop {
            tokio::select! {
                () = &mut watchdog => {
                    tracing::warn!(source = %source_id, "No keyframe within {:?}, ending ingest", timeout);
                    return Err(MuxerError::NoVideo(timeout));
                }
                event = self.receiver.recv() => {
                    match event {
                        Some(IngestEvent::Packet(packet)) => {
                            if packet.is_key_frame {
                                watchdog.as_mut().reset(Instant::now() + timeout);
                            }
                            self.handle_packet(packet)?;
                        }
                        Some(IngestEvent::CodecUpdate(parameters)) => {
                            self.source.set_codec_parameters(parameters);
                        }
                        Some(IngestEvent::FrameRate(fps)) => {
                            self.handle_reported_frame_rate(fps);
                        }
                        None => {
                            tracing::info!(source = %source_id, "Ingest channel closed");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn handle_reported_frame_rate(&mut self, fps: u32) {
        if self.config.frame_rate != FrameRateMode::Reported {
            tracing::trace!(source = %self.source.id(), fps, "Ignoring reported frame rate");
            return;
        }
        if fps != self.reported_fps {
            tracing::debug!(source = %self.source.id(), fps, "Reported frame rate changed");
        }
        self.reported_fps = fps;
    }

    fn handle_packet(&mut self, mut packet: Packet) -> MuxerResult<()> {
        if !self.started {
            if !packet.is_key_frame {
                return Ok(());
            }
            self.started = true;
            tracing::debug!(source = %self.source.id(), "First keyframe received");
        }

        let fps = match self.config.frame_rate {
            FrameRateMode::Pts => return self.source.muxer().write_packet(packet),
            FrameRateMode::Fixed { fps } => fps,
            FrameRateMode::Reported => self.reported_fps,
            FrameRateMode::Probe => match self.probe.observe(&packet) {
                Some(fps) => fps,
                None => return Ok(()),
            },
        };
        if fps == 0 {
            tracing::trace!(source = %self.source.id(), "Frame rate unknown, holding packet back");
            return Ok(());
        }

        packet.duration = Duration::from_secs(1) / fps;
        let muxer = self.source.muxer();
        muxer.set_frame_rate(fps);
        muxer.write_packet(packet)
    }
}
