use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MuxerError {
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Source closed: {0}")]
    SourceClosed(String),

    #[error("Segment not found: {0}")]
    SegmentNotFound(u64),

    #[error("Fragment not found: {segment}/{fragment}")]
    FragmentNotFound { segment: u64, fragment: usize },

    #[error("Index wait timed out after {0:?}")]
    IndexTimeout(Duration),

    #[error("Fragment wait timed out after {0:?}")]
    FragmentTimeout(Duration),

    #[error("No keyframe received within {0:?}")]
    NoVideo(Duration),

    #[error("Ingest channel closed: {0}")]
    IngestClosed(String),

    #[error("Invalid muxer config: {0}")]
    InvalidConfig(String),
}

impl MuxerError {
    /// Whether the error means the requested data is not (or no longer) there.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound(_) | Self::SegmentNotFound(_) | Self::FragmentNotFound { .. }
        )
    }

    /// Whether the error came from a blocking request running out of time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::IndexTimeout(_) | Self::FragmentTimeout(_))
    }
}

pub type MuxerResult<T> = Result<T, MuxerError>;
