//! Serialisation of packet lists into response bodies.
//!
//! The muxer only hands out packets; turning them into a playable container
//! happens behind [`ContainerWriter`]. [`RawContainerWriter`] emits an Annex B
//! elementary stream and is what the server uses unless another writer is
//! plugged into [`AppState`](crate::http::AppState).

use bytes::{BufMut, Bytes, BytesMut};
use llhls_muxer::{CodecParameters, Packet};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("No parameter sets available")]
    MissingParameterSets,

    #[error("Empty media segment {0}")]
    EmptySegment(u64),
}

pub trait ContainerWriter: Send + Sync {
    /// `Content-Type` of every body this writer produces.
    fn content_type(&self) -> &'static str;

    /// Initialisation section built from the source's codec parameters.
    fn init_segment(&self, codec: &CodecParameters) -> Result<Bytes, ContainerError>;

    /// Media body for a whole segment or a single part of segment `sequence`.
    fn media_segment(&self, sequence: u64, packets: &[Packet]) -> Result<Bytes, ContainerError>;
}

/// Annex B passthrough: parameter sets and payloads prefixed with start codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawContainerWriter;

impl RawContainerWriter {
    fn has_start_code(data: &[u8]) -> bool {
        data.starts_with(&START_CODE) || data.starts_with(&START_CODE[1..])
    }

    fn put_unit(out: &mut BytesMut, data: &[u8]) {
        if !Self::has_start_code(data) {
            out.put_slice(&START_CODE);
        }
        out.put_slice(data);
    }
}

impl ContainerWriter for RawContainerWriter {
    fn content_type(&self) -> &'static str {
        "application/octet-stream"
    }

    fn init_segment(&self, codec: &CodecParameters) -> Result<Bytes, ContainerError> {
        if codec.parameter_sets.is_empty() {
            return Err(ContainerError::MissingParameterSets);
        }
        let size = codec
            .parameter_sets
            .iter()
            .map(|set| set.len() + START_CODE.len())
            .sum();
        let mut out = BytesMut::with_capacity(size);
        for set in &codec.parameter_sets {
            Self::put_unit(&mut out, set);
        }
        Ok(out.freeze())
    }

    fn media_segment(&self, sequence: u64, packets: &[Packet]) -> Result<Bytes, ContainerError> {
        if packets.is_empty() {
            return Err(ContainerError::EmptySegment(sequence));
        }
        let size = packets
            .iter()
            .map(|packet| packet.payload.len() + START_CODE.len())
            .sum();
        let mut out = BytesMut::with_capacity(size);
        for packet in packets {
            Self::put_unit(&mut out, &packet.payload);
        }
        Ok(out.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llhls_muxer::VideoCodecType;
    use std::time::Duration;

    #[test]
    fn test_init_segment_prefixes_parameter_sets() {
        let codec = CodecParameters::new(
            VideoCodecType::H264,
            vec![Bytes::from_static(&[0x67, 0x42]), Bytes::from_static(&[0x68, 0xce])],
        );

        let init = RawContainerWriter.init_segment(&codec).unwrap();

        assert_eq!(&init[..], &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xce]);
    }

    #[test]
    fn test_init_segment_requires_parameter_sets() {
        let codec = CodecParameters::new(VideoCodecType::H265, Vec::new());
        assert!(matches!(
            RawContainerWriter.init_segment(&codec),
            Err(ContainerError::MissingParameterSets)
        ));
    }

    #[test]
    fn test_media_segment_keeps_existing_start_codes() {
        let packets = vec![
            Packet::key_frame(Duration::from_millis(40), Bytes::from_static(&[0, 0, 1, 0x65])),
            Packet::delta(Duration::from_millis(40), Bytes::from_static(&[0x41])),
        ];

        let body = RawContainerWriter.media_segment(0, &packets).unwrap();

        assert_eq!(&body[..], &[0, 0, 1, 0x65, 0, 0, 0, 1, 0x41]);
        assert!(matches!(
            RawContainerWriter.media_segment(3, &[]),
            Err(ContainerError::EmptySegment(3))
        ));
    }
}
