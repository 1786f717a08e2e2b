use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;

/// One video access unit as handed over by the ingestion side.
///
/// `payload` is `Bytes`, so cloning a packet (or a whole fragment's packet
/// list) only bumps reference counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub is_key_frame: bool,
    pub duration: Duration,
    pub payload: Bytes,
}

impl Packet {
    #[must_use]
    pub fn new(is_key_frame: bool, duration: Duration, payload: Bytes) -> Self {
        Self {
            is_key_frame,
            duration,
            payload,
        }
    }

    #[must_use]
    pub fn key_frame(duration: Duration, payload: Bytes) -> Self {
        Self::new(true, duration, payload)
    }

    #[must_use]
    pub fn delta(duration: Duration, payload: Bytes) -> Self {
        Self::new(false, duration, payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VideoCodecType {
    H264,
    H265,
}

/// Codec parameter sets (SPS/PPS, plus VPS for H.265) for a source.
///
/// These travel out of band: they are kept on the `LiveSource` and may be
/// replaced mid-stream without touching in-flight segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecParameters {
    pub codec: VideoCodecType,
    pub parameter_sets: Vec<Bytes>,
}

impl CodecParameters {
    #[must_use]
    pub fn new(codec: VideoCodecType, parameter_sets: Vec<Bytes>) -> Self {
        Self {
            codec,
            parameter_sets,
        }
    }
}
