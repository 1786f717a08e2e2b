use axum::Router;
use llhls_muxer::{IngestHandle, MuxerResult, SourceRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::container::ContainerWriter;
use crate::http::{create_router, AppState};

/// Source registry plus the HTTP front end serving it.
pub struct Server {
    config: Config,
    registry: Arc<SourceRegistry>,
    state: AppState,
    shutdown_token: CancellationToken,
}

impl Server {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let registry = Arc::new(SourceRegistry::new(config.muxer.clone()));
        let state = AppState::new(Arc::clone(&registry));

        Ok(Self {
            config,
            registry,
            state,
            shutdown_token: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn with_writer(mut self, writer: Arc<dyn ContainerWriter>) -> Self {
        self.state = self.state.with_writer(writer);
        self
    }

    #[must_use]
    pub fn registry(&self) -> Arc<SourceRegistry> {
        Arc::clone(&self.registry)
    }

    /// Returns a `CancellationToken` that can be used to signal graceful shutdown.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start a live source fed through the returned handle, using the
    /// configured stream settings for `source_id`.
    pub fn start_ingest(&self, source_id: &str) -> MuxerResult<IngestHandle> {
        self.registry
            .spawn_ingest(source_id, self.config.stream(source_id))
    }

    /// Configured stream ids that have no live source yet, sorted.
    #[must_use]
    pub fn pending_streams(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .config
            .streams
            .keys()
            .filter(|id| !self.registry.contains(id))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Serve until the shutdown token is cancelled, then close every source.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("LL-HLS HTTP server listening on {}", addr);

        let shutdown_token = self.shutdown_token.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
            .await?;

        self.registry.shutdown();
        tracing::info!("LL-HLS HTTP server shut down gracefully");
        Ok(())
    }
}
