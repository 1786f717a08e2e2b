use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::MuxerConfig;
use crate::error::{MuxerError, MuxerResult};
use crate::ingest::{IngestEvent, IngestSender, Ingestor, StreamConfig};
use crate::muxer::{LiveMuxer, MuxerStats};
use crate::packet::CodecParameters;

/// One live source: its muxer plus the out-of-band codec parameters.
pub struct LiveSource {
    id: String,
    muxer: LiveMuxer,
    codec: RwLock<Option<CodecParameters>>,
}

impl fmt::Debug for LiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSource")
            .field("id", &self.id)
            .field("closed", &self.muxer.is_closed())
            .finish_non_exhaustive()
    }
}

impl LiveSource {
    fn new(id: String, config: MuxerConfig) -> Self {
        Self {
            muxer: LiveMuxer::new(id.clone(), config),
            id,
            codec: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn muxer(&self) -> &LiveMuxer {
        &self.muxer
    }

    pub fn set_codec_parameters(&self, parameters: CodecParameters) {
        tracing::debug!(
            source = %self.id,
            codec = ?parameters.codec,
            parameter_sets = parameters.parameter_sets.len(),
            "Codec parameters updated"
        );
        *self.codec.write() = Some(parameters);
    }

    #[must_use]
    pub fn codec_parameters(&self) -> Option<CodecParameters> {
        self.codec.read().clone()
    }
}

/// Sending half of a running ingest task.
pub struct IngestHandle {
    source_id: String,
    sender: IngestSender,
    task: JoinHandle<MuxerResult<()>>,
}

impl IngestHandle {
    #[must_use]
    pub fn sender(&self) -> IngestSender {
        self.sender.clone()
    }

    pub async fn send(&self, event: IngestEvent) -> MuxerResult<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| MuxerError::IngestClosed(self.source_id.clone()))
    }

    /// Close the channel and wait for the ingest task to drain it.
    pub async fn finish(self) -> MuxerResult<()> {
        drop(self.sender);
        self.task
            .await
            .map_err(|_| MuxerError::IngestClosed(self.source_id))?
    }
}

/// Live sources by id.
///
/// Each entry is a long-lived `Arc<LiveSource>` mutated in place; handlers
/// clone the `Arc` and never hold a map guard across an await.
pub struct SourceRegistry {
    sources: DashMap<String, Arc<LiveSource>>,
    config: MuxerConfig,
}

impl SourceRegistry {
    #[must_use]
    pub fn new(config: MuxerConfig) -> Self {
        Self {
            sources: DashMap::new(),
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &MuxerConfig {
        &self.config
    }

    /// Create a fresh muxer for `source_id`. An existing instance is closed and replaced.
    pub fn new_instance(&self, source_id: &str) -> Arc<LiveSource> {
        let source = Arc::new(LiveSource::new(source_id.to_string(), self.config.clone()));
        if let Some(previous) = self
            .sources
            .insert(source_id.to_string(), Arc::clone(&source))
        {
            tracing::info!(source = %source_id, "Replacing existing live source");
            previous.muxer().close();
        } else {
            tracing::info!(source = %source_id, "Live source created");
        }
        source
    }

    pub fn get(&self, source_id: &str) -> MuxerResult<Arc<LiveSource>> {
        self.sources
            .get(source_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| MuxerError::SourceNotFound(source_id.to_string()))
    }

    /// Remove and tear down the source.
    pub fn close(&self, source_id: &str) -> MuxerResult<()> {
        let (_, source) = self
            .sources
            .remove(source_id)
            .ok_or_else(|| MuxerError::SourceNotFound(source_id.to_string()))?;
        source.muxer().close();
        tracing::info!(source = %source_id, "Live source closed");
        Ok(())
    }

    /// Tear down `source` and remove it if it is still the registered instance.
    pub fn close_instance(&self, source: &Arc<LiveSource>) -> bool {
        source.muxer().close();
        let removed = self
            .sources
            .remove_if(source.id(), |_, current| Arc::ptr_eq(current, source))
            .is_some();
        if removed {
            tracing::info!(source = %source.id(), "Live source closed");
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, source_id: &str) -> bool {
        self.sources.contains_key(source_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    #[must_use]
    pub fn list(&self) -> Vec<MuxerStats> {
        let mut stats: Vec<MuxerStats> = self
            .sources
            .iter()
            .map(|entry| entry.value().muxer().stats())
            .collect();
        stats.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        stats
    }

    /// Close every source.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.sources.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, source)) = self.sources.remove(&id) {
                source.muxer().close();
            }
        }
        tracing::info!("All live sources closed");
    }

    /// Start a new instance for `source_id` fed by a spawned [`Ingestor`].
    ///
    /// When the ingest task ends, for whatever reason, its instance is closed.
    pub fn spawn_ingest(
        self: &Arc<Self>,
        source_id: &str,
        config: StreamConfig,
    ) -> MuxerResult<IngestHandle> {
        config.validate()?;
        let source = self.new_instance(source_id);
        let (sender, receiver) = mpsc::channel(config.ingest_channel_capacity);
        let ingestor = Ingestor::new(Arc::clone(&source), config, receiver);

        let registry = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = ingestor.run().await;
            if let Err(e) = &result {
                tracing::warn!(source = %source.id(), "Ingest ended: {}", e);
            }
            registry.close_instance(&source);
            result
        });

        Ok(IngestHandle {
            source_id: source_id.to_string(),
            sender,
            task,
        })
    }
}
