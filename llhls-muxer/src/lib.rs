//! Live LL-HLS muxer core.
//!
//! Packets are grouped into keyframe-aligned segments and fixed-cadence parts,
//! kept in a bounded window, and published through a playlist that supports
//! blocking reloads.

pub mod config;
pub mod error;
pub mod ingest;
pub mod muxer;
pub mod packet;
pub mod playlist;
pub mod registry;
pub mod segment;
pub mod session;
pub mod store;

pub use config::{FragmentPolicy, MuxerConfig, WakePolicy};
pub use error::{MuxerError, MuxerResult};
pub use ingest::{FrameRateMode, IngestEvent, IngestSender, Ingestor, StreamConfig};
pub use muxer::{FragmentLookup, IndexLookup, LiveMuxer, MuxerStats};
pub use packet::{CodecParameters, Packet, VideoCodecType};
pub use registry::{IngestHandle, LiveSource, SourceRegistry};
pub use segment::{Fragment, Segment};
pub use session::SessionId;
pub use store::{Cursor, SegmentStore};
