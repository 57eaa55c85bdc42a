//! Pluggable blob storage for attachment bytes.
//!
//! Two backends:
//!
//! - **Database**: bytes live in `attachment_file_chunks`, 256 KiB rows.
//!   Always available; keeps single-binary deployments dependency-free.
//! - **S3**: single PUT up to 5 MiB, multipart above that with one in-flight
//!   part. Requires the `s3-storage` feature.
//!
//! All backends stream: memory stays bounded regardless of blob size. The
//! upload path wraps the incoming stream in a size-limit + SHA-256 counter;
//! an overrun aborts the transfer and surfaces as `TooLarge`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(feature = "s3-storage")]
use crate::config::S3StorageConfig;
use crate::{
    config::{BlobStoreConfig, BlobStoreKind},
    db::{DbPool, DbPoolRef},
};

/// Errors that can occur during blob storage operations.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob exceeds maximum size of {max} bytes")]
    TooLarge { max: i64 },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type BlobStream = BoxStream<'static, Result<Bytes, BlobStoreError>>;

/// Result of a completed store operation.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub storage_key: String,
    pub size_bytes: i64,
    pub sha256: String,
}

/// Trait for pluggable blob storage backends.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Consume the stream into a new blob, enforcing `max_size`.
    async fn store(
        &self,
        stream: BlobStream,
        max_size: i64,
        content_type: &str,
    ) -> Result<StoredBlob, BlobStoreError>;

    /// Stream a blob's bytes.
    async fn retrieve(&self, storage_key: &str) -> Result<BlobStream, BlobStoreError>;

    /// Delete a blob. Idempotent: deleting a missing blob succeeds, so the
    /// cleanup job can retry after a crash.
    async fn delete(&self, storage_key: &str) -> Result<(), BlobStoreError>;

    /// Pre-signed download URL, if the backend supports one.
    async fn signed_url(
        &self,
        storage_key: &str,
        filename: &str,
        ttl: Duration,
    ) -> Result<Option<String>, BlobStoreError>;

    fn backend_name(&self) -> &'static str;
}

/// Size-limit + SHA-256 accounting for an upload in flight.
struct UploadDigest {
    hasher: Sha256,
    size: i64,
    max: i64,
}

impl UploadDigest {
    fn new(max: i64) -> Self {
        Self {
            hasher: Sha256::new(),
            size: 0,
            max,
        }
    }

    fn update(&mut self, chunk: &[u8]) -> Result<(), BlobStoreError> {
        self.size += chunk.len() as i64;
        if self.size > self.max {
            return Err(BlobStoreError::TooLarge { max: self.max });
        }
        self.hasher.update(chunk);
        Ok(())
    }

    fn finish(self) -> (i64, String) {
        (self.size, hex::encode(self.hasher.finalize()))
    }
}

fn new_storage_key() -> String {
    Uuid::new_v4().simple().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Database backend
// ─────────────────────────────────────────────────────────────────────────────

/// Chunk row size for the database backend.
const DB_CHUNK_SIZE: usize = 256 * 1024;

/// Database-backed blob store: bytes in `attachment_file_chunks`.
pub struct DatabaseBlobStore {
    db: Arc<DbPool>,
}

impl DatabaseBlobStore {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    async fn insert_chunk(&self, key: &str, seq: i64, data: &[u8]) -> Result<(), BlobStoreError> {
        match self.db.pool() {
            #[cfg(feature = "database-sqlite")]
            DbPoolRef::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO attachment_file_chunks (storage_key, seq, data) VALUES (?, ?, ?)",
                )
                .bind(key)
                .bind(seq)
                .bind(data)
                .execute(pool)
                .await
                .map_err(|e| BlobStoreError::Database(e.to_string()))?;
            }
            #[cfg(feature = "database-postgres")]
            DbPoolRef::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO attachment_file_chunks (storage_key, seq, data) VALUES ($1, $2, $3)",
                )
                .bind(key)
                .bind(seq as i32)
                .bind(data)
                .execute(pool)
                .await
                .map_err(|e| BlobStoreError::Database(e.to_string()))?;
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            DbPoolRef::_None(infallible, _) => match infallible {},
        }
        Ok(())
    }

    async fn fetch_chunk(&self, key: &str, seq: i64) -> Result<Option<Vec<u8>>, BlobStoreError> {
        #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
        use sqlx::Row;
        match self.db.pool() {
            #[cfg(feature = "database-sqlite")]
            DbPoolRef::Sqlite(pool) => {
                let row = sqlx::query(
                    "SELECT data FROM attachment_file_chunks WHERE storage_key = ? AND seq = ?",
                )
                .bind(key)
                .bind(seq)
                .fetch_optional(pool)
                .await
                .map_err(|e| BlobStoreError::Database(e.to_string()))?;
                Ok(row.map(|r| r.get("data")))
            }
            #[cfg(feature = "database-postgres")]
            DbPoolRef::Postgres(pool) => {
                let row = sqlx::query(
                    "SELECT data FROM attachment_file_chunks WHERE storage_key = $1 AND seq = $2",
                )
                .bind(key)
                .bind(seq as i32)
                .fetch_optional(pool)
                .await
                .map_err(|e| BlobStoreError::Database(e.to_string()))?;
                Ok(row.map(|r| r.get("data")))
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            DbPoolRef::_None(infallible, _) => match infallible {},
        }
    }

    async fn delete_chunks(&self, key: &str) -> Result<(), BlobStoreError> {
        match self.db.pool() {
            #[cfg(feature = "database-sqlite")]
            DbPoolRef::Sqlite(pool) => {
                sqlx::query("DELETE FROM attachment_file_chunks WHERE storage_key = ?")
                    .bind(key)
                    .execute(pool)
                    .await
                    .map_err(|e| BlobStoreError::Database(e.to_string()))?;
            }
            #[cfg(feature = "database-postgres")]
            DbPoolRef::Postgres(pool) => {
                sqlx::query("DELETE FROM attachment_file_chunks WHERE storage_key = $1")
                    .bind(key)
                    .execute(pool)
                    .await
                    .map_err(|e| BlobStoreError::Database(e.to_string()))?;
            }
            #[cfg(not(any(feature = "database-sqlite", feature = "database-postgres")))]
            DbPoolRef::_None(infallible, _) => match infallible {},
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for DatabaseBlobStore {
    async fn store(
        &self,
        mut stream: BlobStream,
        max_size: i64,
        _content_type: &str,
    ) -> Result<StoredBlob, BlobStoreError> {
        use futures::StreamExt;

        let key = new_storage_key();
        let mut digest = UploadDigest::new(max_size);
        let mut buffer: Vec<u8> = Vec::with_capacity(DB_CHUNK_SIZE);
        let mut seq: i64 = 0;

        let result: Result<(), BlobStoreError> = async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                digest.update(&chunk)?;
                buffer.extend_from_slice(&chunk);
                while buffer.len() >= DB_CHUNK_SIZE {
                    let rest = buffer.split_off(DB_CHUNK_SIZE);
                    self.insert_chunk(&key, seq, &buffer).await?;
                    seq += 1;
                    buffer = rest;
                }
            }
            if !buffer.is_empty() || seq == 0 {
                self.insert_chunk(&key, seq, &buffer).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            // Partial rows are useless without a completed upload.
            let _ = self.delete_chunks(&key).await;
            return Err(e);
        }

        let (size_bytes, sha256) = digest.finish();
        debug!(storage_key = %key, size = size_bytes, "Blob stored in database");
        Ok(StoredBlob {
            storage_key: key,
            size_bytes,
            sha256,
        })
    }

    async fn retrieve(&self, storage_key: &str) -> Result<BlobStream, BlobStoreError> {
        // Probe the first chunk so a missing key fails eagerly.
        let first = self
            .fetch_chunk(storage_key, 0)
            .await?
            .ok_or_else(|| BlobStoreError::NotFound(storage_key.to_string()))?;

        let db = Arc::clone(&self.db);
        let key = storage_key.to_string();
        let stream = async_stream::try_stream! {
            yield Bytes::from(first);
            let store = DatabaseBlobStore { db };
            let mut seq: i64 = 1;
            loop {
                match store.fetch_chunk(&key, seq).await? {
                    Some(data) => {
                        yield Bytes::from(data);
                        seq += 1;
                    }
                    None => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn delete(&self, storage_key: &str) -> Result<(), BlobStoreError> {
        self.delete_chunks(storage_key).await
    }

    async fn signed_url(
        &self,
        _storage_key: &str,
        _filename: &str,
        _ttl: Duration,
    ) -> Result<Option<String>, BlobStoreError> {
        Ok(None)
    }

    fn backend_name(&self) -> &'static str {
        "database"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// S3 backend
// ─────────────────────────────────────────────────────────────────────────────

/// S3 part size; also the cutoff between single PUT and multipart.
#[cfg(feature = "s3-storage")]
const S3_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3-compatible blob store (AWS S3, MinIO, R2, Spaces).
#[cfg(feature = "s3-storage")]
pub struct S3BlobStore {
    config: S3StorageConfig,
    client: aws_sdk_s3::Client,
}

#[cfg(feature = "s3-storage")]
impl S3BlobStore {
    pub async fn new(config: S3StorageConfig) -> Result<Self, BlobStoreError> {
        info!(bucket = %config.bucket, "Initializing S3 blob store");

        let mut sdk_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(aws_config::Region::new(region.clone()));
        }

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = aws_credential_types::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "mnemo-config",
            );
            sdk_config_builder = sdk_config_builder.credentials_provider(credentials);
        }

        let sdk_config = sdk_config_builder.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = aws_sdk_s3::Client::from_conf(s3_config_builder.build());
        Ok(Self { config, client })
    }

    fn object_key(&self, storage_key: &str) -> String {
        match &self.config.key_prefix {
            Some(prefix) => format!("{}{}", prefix, storage_key),
            None => storage_key.to_string(),
        }
    }

    async fn upload_multipart(
        &self,
        stream: &mut BlobStream,
        key: &str,
        content_type: &str,
        first_buffer: Vec<u8>,
        digest: &mut UploadDigest,
    ) -> Result<(), BlobStoreError> {
        use futures::StreamExt;

        let object_key = self.object_key(key);
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| BlobStoreError::S3(e.to_string()))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| BlobStoreError::S3("missing multipart upload id".into()))?
            .to_string();

        let result: Result<Vec<aws_sdk_s3::types::CompletedPart>, BlobStoreError> = async {
            let mut parts = Vec::new();
            let mut part_number: i32 = 1;
            let mut buffer = first_buffer;

            loop {
                // Fill one part, then upload it before pulling more input:
                // at most one part is in flight at a time.
                while buffer.len() < S3_PART_SIZE {
                    match stream.next().await {
                        Some(chunk) => {
                            let chunk = chunk?;
                            digest.update(&chunk)?;
                            buffer.extend_from_slice(&chunk);
                        }
                        None => break,
                    }
                }

                let finished = buffer.len() <= S3_PART_SIZE;
                let part_data = if finished {
                    std::mem::take(&mut buffer)
                } else {
                    let rest = buffer.split_off(S3_PART_SIZE);
                    std::mem::replace(&mut buffer, rest)
                };

                let uploaded = self
                    .client
                    .upload_part()
                    .bucket(&self.config.bucket)
                    .key(&object_key)
                    .upload_id(&upload_id)
                    .part_number(part_number)
                    .body(aws_sdk_s3::primitives::ByteStream::from(part_data))
                    .send()
                    .await
                    .map_err(|e| BlobStoreError::S3(e.to_string()))?;

                parts.push(
                    aws_sdk_s3::types::CompletedPart::builder()
                        .part_number(part_number)
                        .set_e_tag(uploaded.e_tag().map(String::from))
                        .build(),
                );
                part_number += 1;

                if finished {
                    break;
                }
            }
            Ok(parts)
        }
        .await;

        match result {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.config.bucket)
                    .key(&object_key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        aws_sdk_s3::types::CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| BlobStoreError::S3(e.to_string()))?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.config.bucket)
                    .key(&object_key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(error = %abort_err, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }
}

#[cfg(feature = "s3-storage")]
#[async_trait]
impl BlobStore for S3BlobStore {
    async fn store(
        &self,
        mut stream: BlobStream,
        max_size: i64,
        content_type: &str,
    ) -> Result<StoredBlob, BlobStoreError> {
        use futures::StreamExt;

        let key = new_storage_key();
        let mut digest = UploadDigest::new(max_size);
        let mut buffer: Vec<u8> = Vec::new();
        let mut exhausted = true;

        // Buffer up to the part size; small blobs take the single-PUT path.
        while buffer.len() <= S3_PART_SIZE {
            match stream.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    digest.update(&chunk)?;
                    buffer.extend_from_slice(&chunk);
                }
                None => break,
            }
            if buffer.len() > S3_PART_SIZE {
                exhausted = false;
                break;
            }
        }

        if exhausted {
            self.client
                .put_object()
                .bucket(&self.config.bucket)
                .key(self.object_key(&key))
                .content_type(content_type)
                .body(aws_sdk_s3::primitives::ByteStream::from(buffer))
                .send()
                .await
                .map_err(|e| BlobStoreError::S3(e.to_string()))?;
        } else {
            self.upload_multipart(&mut stream, &key, content_type, buffer, &mut digest)
                .await?;
        }

        let (size_bytes, sha256) = digest.finish();
        debug!(storage_key = %key, size = size_bytes, bucket = %self.config.bucket, "Blob stored in S3");
        Ok(StoredBlob {
            storage_key: key,
            size_bytes,
            sha256,
        })
    }

    async fn retrieve(&self, storage_key: &str) -> Result<BlobStream, BlobStoreError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(self.object_key(storage_key))
            .send()
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("NoSuchKey") || msg.contains("NotFound") {
                    BlobStoreError::NotFound(storage_key.to_string())
                } else {
                    BlobStoreError::S3(msg)
                }
            })?;

        let mut body = result.body;
        let stream = async_stream::try_stream! {
            while let Some(chunk) = body
                .try_next()
                .await
                .map_err(|e| BlobStoreError::S3(e.to_string()))?
            {
                yield chunk;
            }
        };
        Ok(Box::pin(stream))
    }

    async fn delete(&self, storage_key: &str) -> Result<(), BlobStoreError> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(self.object_key(storage_key))
            .send()
            .await
            .map_err(|e| BlobStoreError::S3(e.to_string()))?;
        Ok(())
    }

    async fn signed_url(
        &self,
        storage_key: &str,
        filename: &str,
        ttl: Duration,
    ) -> Result<Option<String>, BlobStoreError> {
        let presigning = aws_sdk_s3::presigning::PresigningConfig::expires_in(ttl)
            .map_err(|e| BlobStoreError::S3(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(self.object_key(storage_key))
            .response_content_disposition(format!("attachment; filename=\"{}\"", filename))
            .presigned(presigning)
            .await
            .map_err(|e| BlobStoreError::S3(e.to_string()))?;

        Ok(Some(request.uri().to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

/// Create a blob store backend from configuration.
pub async fn create_blob_store(
    config: &BlobStoreConfig,
    db: Arc<DbPool>,
) -> Result<Arc<dyn BlobStore>, BlobStoreError> {
    match config.kind {
        BlobStoreKind::Db => {
            info!("Using database blob store backend");
            Ok(Arc::new(DatabaseBlobStore::new(db)))
        }
        #[cfg(feature = "s3-storage")]
        BlobStoreKind::S3 => {
            let s3_config = config.s3.clone().ok_or_else(|| {
                BlobStoreError::Config("S3 backend requires [storage.s3] config".to_string())
            })?;
            info!(bucket = %s3_config.bucket, "Using S3 blob store backend");
            Ok(Arc::new(S3BlobStore::new(s3_config).await?))
        }
        #[cfg(not(feature = "s3-storage"))]
        BlobStoreKind::S3 => Err(BlobStoreError::Config(
            "S3 blob store requires the 's3-storage' feature. \
             Rebuild with: cargo build --features s3-storage"
                .to_string(),
        )),
    }
}

/// Collect a blob stream into memory. Test helper and small-blob paths only.
pub async fn collect_stream(stream: BlobStream) -> Result<Vec<u8>, BlobStoreError> {
    use futures::TryStreamExt;
    let chunks: Vec<Bytes> = stream.try_collect().await?;
    Ok(chunks.concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_digest_tracks_size_and_hash() {
        let mut digest = UploadDigest::new(100);
        digest.update(b"hello ").unwrap();
        digest.update(b"world").unwrap();
        let (size, sha256) = digest.finish();
        assert_eq!(size, 11);
        assert_eq!(sha256, hex::encode(Sha256::digest(b"hello world")));
    }

    #[test]
    fn upload_digest_rejects_overrun() {
        let mut digest = UploadDigest::new(10);
        digest.update(&[0u8; 10]).unwrap();
        assert!(matches!(
            digest.update(&[0u8; 1]),
            Err(BlobStoreError::TooLarge { max: 10 })
        ));
    }

    #[test]
    fn storage_keys_are_unique() {
        assert_ne!(new_storage_key(), new_storage_key());
    }
}
