mod access;
mod attachments;
mod blob_store;
mod conversations;
mod embedder;
mod entries;
mod memberships;
mod search;
mod vector_store;

use std::sync::Arc;

pub use access::AccessPolicy;
pub use attachments::{AttachmentService, DownloadTokenSigner};
#[cfg(feature = "s3-storage")]
pub use blob_store::S3BlobStore;
pub use blob_store::{
    BlobStore, BlobStoreError, BlobStream, DatabaseBlobStore, StoredBlob, collect_stream,
    create_blob_store,
};
pub use conversations::ConversationService;
pub use embedder::{Embedder, EmbedderError, HashingEmbedder, OpenAiEmbedder, create_embedder};
pub use entries::{EntryService, RecordedOutputSink};
pub use memberships::MembershipService;
pub use search::{SearchHit, SearchMode, SearchService};
#[cfg(feature = "database-postgres")]
pub use vector_store::PgVectorStore;
pub use vector_store::{
    MemoryVectorStore, VectorMatch, VectorRecord, VectorStore, VectorStoreError,
    create_vector_store,
};

use thiserror::Error;

use crate::{crypto::CryptoError, db::DbError};

/// Domain error taxonomy. Raised by the service layer, mapped once at the
/// transport edge.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Not found")]
    NotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Attachment exceeds maximum size of {max} bytes")]
    FileTooLarge { max: i64 },

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Not implemented: {0}")]
    Unimplemented(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(DbError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => ServiceError::NotFound,
            DbError::Conflict(msg) => ServiceError::Conflict(msg),
            DbError::Validation(msg) => ServiceError::Validation(msg),
            other => ServiceError::Database(other),
        }
    }
}

impl From<BlobStoreError> for ServiceError {
    fn from(err: BlobStoreError) -> Self {
        match err {
            BlobStoreError::TooLarge { max } => ServiceError::FileTooLarge { max },
            BlobStoreError::NotFound(key) => {
                ServiceError::Storage(format!("blob missing: {key}"))
            }
            other => ServiceError::Storage(other.to_string()),
        }
    }
}

impl From<CryptoError> for ServiceError {
    fn from(err: CryptoError) -> Self {
        ServiceError::Internal(format!("encryption: {err}"))
    }
}

/// Container for all services, wired once at boot.
#[derive(Clone)]
pub struct Services {
    pub access: Arc<AccessPolicy>,
    pub conversations: ConversationService,
    pub entries: EntryService,
    pub memberships: MembershipService,
    pub attachments: AttachmentService,
    pub search: SearchService,
}
