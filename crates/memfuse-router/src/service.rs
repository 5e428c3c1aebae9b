// SPDX-FileCopyrightText: 2026 MemFuse Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Service assembly.
//!
//! Wires the store, embedding cache, retrieval, chat pipeline, subagent
//! registry, orchestrator, and extraction workers into a running
//! [`MemoryRouter`]. The provider and embedder are injected so deployments
//! (and tests) choose their own backends; everything else is built from
//! configuration.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use memfuse_config::MemfuseConfig;
use memfuse_core::traits::{EmbeddingAdapter, ProviderAdapter};
use memfuse_core::MemfuseError;
use memfuse_embedding::CachingEmbedder;
use memfuse_extractor::{ExtractionTrigger, ExtractorWorkerPool, MemoryExtractor};
use memfuse_orchestrator::agents::{
    DatabaseQueryAgent, RagQueryAgent, ReportGenerationAgent, ShellCommandAgent, WebSearchAgent,
};
use memfuse_orchestrator::{Orchestrator, SubagentRegistry};
use memfuse_rag::{RagService, SessionLocks};
use memfuse_retrieval::HybridRetriever;
use memfuse_storage::Database;

use crate::router::MemoryRouter;

/// A fully wired MemFuse engine.
pub struct MemfuseService {
    router: Arc<MemoryRouter>,
    db: Arc<Database>,
    extractor_pool: Option<ExtractorWorkerPool>,
    shutdown: CancellationToken,
}

impl MemfuseService {
    /// Build and start the engine against an already opened database.
    pub async fn start_with_db(
        config: MemfuseConfig,
        db: Arc<Database>,
        provider: Arc<dyn ProviderAdapter>,
        embedder: Arc<dyn EmbeddingAdapter>,
    ) -> Result<Self, MemfuseError> {
        config.validate().map_err(MemfuseError::Config)?;

        let embedder: Arc<dyn EmbeddingAdapter> = Arc::new(CachingEmbedder::new(
            embedder,
            config.embedding.cache_capacity,
        ));

        let retriever = Arc::new(HybridRetriever::new(
            db.clone(),
            embedder.clone(),
            config.retrieval.clone(),
            config.procedural.top_k,
        ));

        let locks = Arc::new(SessionLocks::new());
        let rag = Arc::new(RagService::new(
            db.clone(),
            embedder.clone(),
            provider.clone(),
            retriever.clone(),
            config.context.clone(),
            config.llm.clone(),
            config.retrieval.clone(),
            locks,
        ));

        let mut registry = SubagentRegistry::new();
        registry.register(Arc::new(RagQueryAgent::new(rag.clone())));
        registry.register(Arc::new(DatabaseQueryAgent::new(
            db.clone(),
            provider.clone(),
            config.llm.clone(),
        )));
        registry.register(Arc::new(ReportGenerationAgent::new(
            provider.clone(),
            config.llm.clone(),
        )));
        registry.register(Arc::new(WebSearchAgent::new()?));
        registry.register(Arc::new(ShellCommandAgent::new()));
        let registry = Arc::new(registry);
        info!(agents = registry.len(), "subagent registry initialized");

        let orchestrator = Arc::new(Orchestrator::new(
            db.clone(),
            embedder.clone(),
            provider.clone(),
            registry,
            config.procedural.clone(),
            config.llm.clone(),
        ));

        let trigger = Arc::new(ExtractionTrigger::new(db.clone(), config.extractor.clone()));

        let shutdown = CancellationToken::new();
        let extractor_pool = if config.extractor.enabled {
            let extractor = Arc::new(MemoryExtractor::new(
                db.clone(),
                embedder.clone(),
                provider.clone(),
                config.extractor.clone(),
                config.llm.clone(),
            ));
            Some(
                ExtractorWorkerPool::start(
                    db.clone(),
                    embedder.clone(),
                    extractor,
                    config.extractor.clone(),
                    shutdown.child_token(),
                )
                .await?,
            )
        } else {
            info!("extractor disabled by configuration");
            None
        };

        let router = Arc::new(MemoryRouter::new(
            db.clone(),
            embedder,
            rag,
            orchestrator,
            retriever,
            trigger,
            config.router.clone(),
            config.retrieval.clone(),
            config.procedural.top_k,
        ));

        info!("memfuse service started");
        Ok(Self {
            router,
            db,
            extractor_pool,
            shutdown,
        })
    }

    /// Open the configured database and start the engine.
    pub async fn start(
        config: MemfuseConfig,
        provider: Arc<dyn ProviderAdapter>,
        embedder: Arc<dyn EmbeddingAdapter>,
    ) -> Result<Self, MemfuseError> {
        let db = Arc::new(Database::open(&config.storage.database_path).await?);
        Self::start_with_db(config, db, provider, embedder).await
    }

    /// The request entry point.
    pub fn router(&self) -> Arc<MemoryRouter> {
        self.router.clone()
    }

    /// Shared database handle (diagnostics and tests).
    pub fn db(&self) -> Arc<Database> {
        self.db.clone()
    }

    /// Graceful shutdown: signal the workers, finish in-flight extraction
    /// jobs, and leave the rest of the queue durable for the next start.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Some(pool) = self.extractor_pool {
            pool.shutdown().await;
        }
        info!("memfuse service stopped");
    }
}
