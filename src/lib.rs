//! mnemo — a conversation memory service for LLM agent platforms.
//!
//! Persists the durable state an agent needs across turns: the
//! user-visible transcript, the agent's rolling working memory, indexed
//! searchable transcripts, and multi-modal attachments, behind a dual
//! REST/gRPC surface with group-scoped access control and sharing.

pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod db;
#[cfg(feature = "grpc")]
pub mod grpc;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod recorder;
pub mod routes;
pub mod services;

#[cfg(all(test, feature = "database-sqlite"))]
mod tests;

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    auth::TokenResolver,
    config::MemoryConfig,
    db::DbPool,
    jobs::{AttachmentCleanup, BlobDeleteHandler, EvictionService, TaskProcessor, VectorIndexer},
    recorder::ResponseRecorder,
    services::{
        AccessPolicy, AttachmentService, ConversationService, DownloadTokenSigner, EntryService,
        MembershipService, RecordedOutputSink, SearchService, ServiceError, Services,
        create_blob_store, create_embedder, create_vector_store,
    },
};

/// Errors raised while assembling the application.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("auth error: {0}")]
    Auth(#[from] auth::AuthError),

    #[error("blob store error: {0}")]
    BlobStore(#[from] services::BlobStoreError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] services::VectorStoreError),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("metrics error: {0}")]
    Metrics(#[from] observability::metrics::MetricsError),
}

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<MemoryConfig>,
    pub db: Arc<DbPool>,
    pub services: Services,
    pub recorder: ResponseRecorder,
    pub eviction: EvictionService,
    pub resolver: Arc<dyn TokenResolver>,
}

/// Workers to spawn once the state is built.
pub struct BackgroundJobs {
    pub eviction: EvictionService,
    pub cleanup: AttachmentCleanup,
    pub indexer: Option<VectorIndexer>,
    pub tasks: TaskProcessor,
}

/// Wire every component from configuration: database, encryption, blob
/// store, search plugs, services, recorder, and background jobs.
pub async fn build_state(config: MemoryConfig) -> Result<(AppState, BackgroundJobs), BootError> {
    let config = Arc::new(config);

    let db = Arc::new(DbPool::from_config(&config.database).await?);
    if config.database.run_migrations() {
        db.run_migrations().await?;
    }

    let encryption = crypto::provider_from_key(config.encryption.key.as_deref())?;
    if config.encryption.key.is_some() {
        info!("Entry content encryption enabled");
    }

    let blob_store = create_blob_store(&config.storage, Arc::clone(&db)).await?;
    let signer = Arc::new(DownloadTokenSigner::new(
        config.storage.download_token_key.as_deref(),
    )?);

    let http_client = reqwest::Client::new();
    let embedder = create_embedder(&config.search.embedder, http_client);
    let dimensions = embedder.as_ref().map(|e| e.dimensions()).unwrap_or(0);
    let vector_store = create_vector_store(config.search.vector, &db, dimensions).await?;

    let access = Arc::new(AccessPolicy::new(Arc::clone(&db), config.auth.clone()));
    let pending_link_expiry =
        chrono::Duration::seconds(config.storage.upload_expiration_secs as i64);

    let services = Services {
        access: Arc::clone(&access),
        conversations: ConversationService::new(Arc::clone(&db), Arc::clone(&access)),
        entries: EntryService::new(
            Arc::clone(&db),
            Arc::clone(&access),
            Arc::clone(&encryption),
            pending_link_expiry,
        ),
        memberships: MembershipService::new(Arc::clone(&db), Arc::clone(&access)),
        attachments: AttachmentService::new(
            Arc::clone(&db),
            Arc::clone(&access),
            Arc::clone(&blob_store),
            signer,
            config.storage.clone(),
        ),
        search: SearchService::new(
            Arc::clone(&db),
            Arc::clone(&encryption),
            embedder.clone(),
            vector_store.clone(),
        ),
    };

    // Completion hook: finished (or interrupted) recordings land in the
    // transcript through the entry store.
    let recorder_sink = Arc::new(RecordedOutputSink::new(
        Arc::clone(&db),
        Arc::clone(&encryption),
    ));
    let recorder = ResponseRecorder::from_config(config.resumer.clone(), Some(recorder_sink))?;
    let resolver = auth::create_resolver(&config.auth.token)?;

    let eviction = EvictionService::new(
        Arc::clone(&db),
        Arc::clone(&blob_store),
        vector_store.clone(),
        config.retention.clone(),
    );
    let cleanup = AttachmentCleanup::new(
        Arc::clone(&db),
        Arc::clone(&blob_store),
        config.retention.clone(),
    );
    let indexer = match (embedder, vector_store) {
        (Some(embedder), Some(vector_store)) => Some(VectorIndexer::new(
            Arc::clone(&db),
            embedder,
            vector_store,
            config.search.clone(),
        )),
        _ => None,
    };
    let tasks = TaskProcessor::new(Arc::clone(&db), config.retention.clone())
        .handler(
            "attachment_blob_delete",
            Arc::new(BlobDeleteHandler::new(Arc::clone(&db), blob_store)),
        )
        .build();

    let state = AppState {
        config,
        db,
        services,
        recorder,
        eviction: eviction.clone(),
        resolver,
    };

    Ok((
        state,
        BackgroundJobs {
            eviction,
            cleanup,
            indexer,
            tasks,
        },
    ))
}

/// Spawn the background workers under the given shutdown token.
pub fn spawn_background_jobs(
    background: BackgroundJobs,
    enabled: bool,
    shutdown: &CancellationToken,
) {
    if !enabled {
        info!("Background workers disabled by configuration");
        return;
    }
    tokio::spawn(jobs::start_eviction_worker(
        background.eviction,
        shutdown.clone(),
    ));
    tokio::spawn(jobs::start_cleanup_worker(
        background.cleanup,
        shutdown.clone(),
    ));
    if let Some(indexer) = background.indexer {
        tokio::spawn(jobs::start_indexer_worker(indexer, shutdown.clone()));
    }
    tokio::spawn(jobs::start_task_worker(background.tasks, shutdown.clone()));
}
