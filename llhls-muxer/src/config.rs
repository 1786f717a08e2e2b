use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::MuxerError;

/// Default minimum segment length before a keyframe may start a new segment.
pub const DEFAULT_SEGMENT_MIN_DURATION_MS: u64 = 4000;
/// Default number of packets per part.
pub const DEFAULT_FRAGMENT_PACKETS: usize = 5;
/// Default sliding window size, in segments.
pub const DEFAULT_MAX_SEGMENTS: usize = 6;
/// Default multiplier applied to part/segment targets for the hold-back attributes.
pub const DEFAULT_HOLD_BACK_MULTIPLIER: u32 = 4;
/// Default deadline for a blocking playlist reload.
pub const DEFAULT_INDEX_WAIT_TIMEOUT_MS: u64 = 10_000;
/// Default deadline for a blocking part request.
pub const DEFAULT_FRAGMENT_WAIT_TIMEOUT_MS: u64 = 2_000;
/// Target duration advertised before the first segment has been closed.
pub const DEFAULT_INITIAL_TARGET_DURATION_MS: u64 = 2_000;

/// How the muxer decides where a part ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FragmentPolicy {
    /// Cut after a fixed number of packets.
    PacketCount { packets: usize },
    /// Cut once the accumulated part duration reaches the target.
    Duration { target_ms: u64 },
}

impl Default for FragmentPolicy {
    fn default() -> Self {
        Self::PacketCount {
            packets: DEFAULT_FRAGMENT_PACKETS,
        }
    }
}

impl FragmentPolicy {
    /// Whether a part holding `packets` packets and lasting `duration` is complete.
    #[must_use]
    pub fn is_complete(&self, packets: usize, duration: Duration) -> bool {
        match *self {
            Self::PacketCount { packets: limit } => packets >= limit,
            Self::Duration { target_ms } => {
                packets > 0 && duration >= Duration::from_millis(target_ms)
            }
        }
    }
}

/// Which parked playlist requests are released when a new playlist is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakePolicy {
    /// Only sessions whose requested `(msn, part)` is now published.
    #[default]
    Satisfied,
    /// Every parked session, on every publish.
    All,
}

/// Tunables of a single live muxer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxerConfig {
    pub segment_min_duration_ms: u64,
    pub fragment_policy: FragmentPolicy,
    pub max_segments: usize,
    pub hold_back_multiplier: u32,
    pub index_wait_timeout_ms: u64,
    pub fragment_wait_timeout_ms: u64,
    pub initial_target_duration_ms: u64,
    pub wake_policy: WakePolicy,
    /// URI advertised in `#EXT-X-MAP`
    pub init_segment_uri: String,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            segment_min_duration_ms: DEFAULT_SEGMENT_MIN_DURATION_MS,
            fragment_policy: FragmentPolicy::default(),
            max_segments: DEFAULT_MAX_SEGMENTS,
            hold_back_multiplier: DEFAULT_HOLD_BACK_MULTIPLIER,
            index_wait_timeout_ms: DEFAULT_INDEX_WAIT_TIMEOUT_MS,
            fragment_wait_timeout_ms: DEFAULT_FRAGMENT_WAIT_TIMEOUT_MS,
            initial_target_duration_ms: DEFAULT_INITIAL_TARGET_DURATION_MS,
            wake_policy: WakePolicy::default(),
            init_segment_uri: "init.mp4".to_string(),
        }
    }
}

impl MuxerConfig {
    #[must_use]
    pub const fn segment_min_duration(&self) -> Duration {
        Duration::from_millis(self.segment_min_duration_ms)
    }

    #[must_use]
    pub const fn index_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.index_wait_timeout_ms)
    }

    #[must_use]
    pub const fn fragment_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.fragment_wait_timeout_ms)
    }

    #[must_use]
    pub const fn initial_target_duration(&self) -> Duration {
        Duration::from_millis(self.initial_target_duration_ms)
    }

    /// Reject settings the state machine cannot run with.
    pub fn validate(&self) -> Result<(), MuxerError> {
        if self.max_segments == 0 {
            return Err(MuxerError::InvalidConfig(
                "max_segments must be at least 1".to_string(),
            ));
        }
        if self.hold_back_multiplier == 0 {
            return Err(MuxerError::InvalidConfig(
                "hold_back_multiplier must be at least 1".to_string(),
            ));
        }
        match self.fragment_policy {
            FragmentPolicy::PacketCount { packets: 0 } => {
                return Err(MuxerError::InvalidConfig(
                    "fragment_policy.packets must be at least 1".to_string(),
                ));
            }
            FragmentPolicy::Duration { target_ms: 0 } => {
                return Err(MuxerError::InvalidConfig(
                    "fragment_policy.target_ms must be positive".to_string(),
                ));
            }
            _ => {}
        }
        if self.init_segment_uri.is_empty() {
            return Err(MuxerError::InvalidConfig(
                "init_segment_uri must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
