use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{AccessPolicy, BlobStore, BlobStream, ServiceError, ServiceResult};
use crate::{
    auth::Subject,
    config::BlobStoreConfig,
    db::{DbPool, RefcountDecision},
    models::{AccessLevel, Attachment, CreateAttachment},
};

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies short-lived download tokens of the form
/// `base64url("{attachment_id}.{expiry_unix}.{hmac_hex}")`.
///
/// Used when the blob backend cannot presign URLs (database backend) or as
/// a fallback: browsers opening `<a href>` in a new tab send no auth
/// headers, so the token itself is the credential.
pub struct DownloadTokenSigner {
    key: Vec<u8>,
}

impl DownloadTokenSigner {
    /// Use the configured key, or generate an ephemeral one — which
    /// invalidates outstanding tokens on restart.
    pub fn new(configured: Option<&str>) -> Result<Self, ServiceError> {
        let key = match configured {
            Some(encoded) => {
                use base64::engine::general_purpose::STANDARD;
                STANDARD
                    .decode(encoded)
                    .or_else(|_| hex::decode(encoded))
                    .map_err(|_| {
                        ServiceError::Internal(
                            "storage.download_token_key must be base64 or hex".into(),
                        )
                    })?
            }
            None => {
                let mut key = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                key
            }
        };
        Ok(Self { key })
    }

    fn mac(&self, attachment_id: Uuid, expiry_unix: i64) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(format!("{attachment_id}.{expiry_unix}").as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    pub fn sign(&self, attachment_id: Uuid, expires_at: DateTime<Utc>) -> String {
        let expiry_unix = expires_at.timestamp();
        let tag = hex::encode(self.mac(attachment_id, expiry_unix));
        URL_SAFE_NO_PAD.encode(format!("{attachment_id}.{expiry_unix}.{tag}"))
    }

    /// Verify a token; constant-time tag comparison, expired tokens fail.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Uuid, ServiceError> {
        let forbidden = || ServiceError::Forbidden("invalid or expired download token".into());

        let raw = URL_SAFE_NO_PAD.decode(token).map_err(|_| forbidden())?;
        let raw = String::from_utf8(raw).map_err(|_| forbidden())?;
        let mut parts = raw.splitn(3, '.');
        let (id_part, expiry_part, tag_part) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => return Err(forbidden()),
        };

        let attachment_id = Uuid::parse_str(id_part).map_err(|_| forbidden())?;
        let expiry_unix: i64 = expiry_part.parse().map_err(|_| forbidden())?;
        let claimed = hex::decode(tag_part).map_err(|_| forbidden())?;

        let expected = self.mac(attachment_id, expiry_unix);
        if expected.ct_eq(&claimed).unwrap_u8() != 1 {
            return Err(forbidden());
        }
        if now.timestamp() > expiry_unix {
            return Err(forbidden());
        }
        Ok(attachment_id)
    }
}

/// Attachment lifecycle: streaming upload, access-checked download, signed
/// download URLs, and reference-counted deletion against the blob store.
#[derive(Clone)]
pub struct AttachmentService {
    db: Arc<DbPool>,
    access: Arc<AccessPolicy>,
    blob_store: Arc<dyn BlobStore>,
    signer: Arc<DownloadTokenSigner>,
    config: BlobStoreConfig,
}

impl AttachmentService {
    pub fn new(
        db: Arc<DbPool>,
        access: Arc<AccessPolicy>,
        blob_store: Arc<dyn BlobStore>,
        signer: Arc<DownloadTokenSigner>,
        config: BlobStoreConfig,
    ) -> Self {
        Self {
            db,
            access,
            blob_store,
            signer,
            config,
        }
    }

    fn unlinked_expiry(&self, requested_secs: Option<u64>) -> DateTime<Utc> {
        let secs = requested_secs
            .unwrap_or(self.config.default_expiration_secs)
            .min(self.config.max_expiration_secs);
        Utc::now() + chrono::Duration::seconds(secs as i64)
    }

    /// Upload an attachment: create the metadata row with a short expiry,
    /// stream the bytes through the size-limit + SHA-256 wrapper into the
    /// blob store, then finalize the row.
    ///
    /// An overrun aborts the stream, removes the row, and surfaces as
    /// `file_too_large`; neither a row nor a blob survives a failed upload.
    #[instrument(skip(self, input, stream), fields(user = %subject.user_id))]
    pub async fn upload(
        &self,
        subject: &Subject,
        input: CreateAttachment,
        stream: BlobStream,
    ) -> ServiceResult<Attachment> {
        let now = Utc::now();
        let attachment = self
            .db
            .attachments()
            .create(Attachment {
                id: Uuid::new_v4(),
                user_id: subject.user_id.clone(),
                content_type: input.content_type.clone(),
                filename: input.filename.clone(),
                size_bytes: 0,
                sha256: None,
                storage_key: None,
                entry_id: None,
                expires_at: Some(
                    now + chrono::Duration::seconds(self.config.upload_expiration_secs as i64),
                ),
                created_at: now,
                deleted_at: None,
            })
            .await?;

        let stored = match self
            .blob_store
            .store(stream, self.config.max_attachment_bytes, &input.content_type)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                // The row is useless without bytes; reap it immediately
                // rather than waiting for the expiry sweep.
                let _ = self.db.attachments().delete_row(attachment.id).await;
                return Err(e.into());
            }
        };

        let finalized = self
            .db
            .attachments()
            .record_upload(
                attachment.id,
                &stored.storage_key,
                stored.size_bytes,
                &stored.sha256,
                self.unlinked_expiry(input.expires_in_secs),
            )
            .await?;

        crate::observability::metrics::record_attachment_upload(
            self.blob_store.backend_name(),
            stored.size_bytes,
        );
        info!(
            attachment_id = %finalized.id,
            size = stored.size_bytes,
            backend = self.blob_store.backend_name(),
            "Attachment uploaded"
        );
        Ok(finalized)
    }

    /// Access rule: a linked attachment is visible to any member of the
    /// group its entry lives in; an unlinked one only to its uploader.
    async fn check_read(&self, subject: &Subject, attachment: &Attachment) -> ServiceResult<()> {
        match self.db.attachments().linked_group_id(attachment.id).await? {
            Some(group_id) => {
                self.access
                    .require(group_id, subject, AccessLevel::Reader)
                    .await?;
            }
            None => {
                if attachment.user_id != subject.user_id && !self.access.is_admin(subject) {
                    return Err(ServiceError::NotFound);
                }
            }
        }
        Ok(())
    }

    pub async fn get(&self, subject: &Subject, id: Uuid) -> ServiceResult<Attachment> {
        let attachment = self
            .db
            .attachments()
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.check_read(subject, &attachment).await?;
        Ok(attachment)
    }

    /// Stream an attachment's bytes.
    pub async fn download(
        &self,
        subject: &Subject,
        id: Uuid,
    ) -> ServiceResult<(Attachment, BlobStream)> {
        let attachment = self.get(subject, id).await?;
        let storage_key = attachment
            .storage_key
            .as_deref()
            .ok_or_else(|| ServiceError::Validation("attachment upload is incomplete".into()))?;
        let stream = self.blob_store.retrieve(storage_key).await?;
        Ok((attachment, stream))
    }

    /// A URL a browser can open without auth headers: an S3 presigned URL
    /// when the backend supports it, otherwise an HMAC-token download path.
    pub async fn download_url(&self, subject: &Subject, id: Uuid) -> ServiceResult<String> {
        let attachment = self.get(subject, id).await?;
        let storage_key = attachment
            .storage_key
            .as_deref()
            .ok_or_else(|| ServiceError::Validation("attachment upload is incomplete".into()))?;

        let ttl = std::time::Duration::from_secs(self.config.download_url_ttl_secs);
        let filename = attachment.filename.clone().unwrap_or_else(|| id.to_string());

        if let Some(url) = self
            .blob_store
            .signed_url(storage_key, &filename, ttl)
            .await?
        {
            return Ok(url);
        }

        let expires_at = Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64);
        let token = self.signer.sign(id, expires_at);
        Ok(format!("/v1/attachments/download/{token}/{filename}"))
    }

    /// Redeem a signed download token. Unauthenticated path.
    pub async fn download_by_token(
        &self,
        token: &str,
    ) -> ServiceResult<(Attachment, BlobStream)> {
        let id = self.signer.verify(token, Utc::now())?;
        let attachment = self
            .db
            .attachments()
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        let storage_key = attachment
            .storage_key
            .as_deref()
            .ok_or(ServiceError::NotFound)?;
        let stream = self.blob_store.retrieve(storage_key).await?;
        Ok((attachment, stream))
    }

    /// Delete an attachment with blob reference counting.
    ///
    /// The row-level decision runs under row locks; if this row was the last
    /// live reference the row is first soft-deleted, then the blob removed,
    /// then the row hard-deleted. A crash in between leaves a soft-deleted
    /// row for the cleanup job, which retries the idempotent blob delete —
    /// no crash ordering can orphan a live blob.
    #[instrument(skip(self), fields(user = %subject.user_id))]
    pub async fn delete(&self, subject: &Subject, id: Uuid) -> ServiceResult<()> {
        let attachment = self
            .db
            .attachments()
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound)?;

        match self.db.attachments().linked_group_id(id).await? {
            Some(group_id) => {
                self.access
                    .require(group_id, subject, AccessLevel::Writer)
                    .await?;
            }
            None => {
                if attachment.user_id != subject.user_id && !self.access.is_admin(subject) {
                    return Err(ServiceError::NotFound);
                }
            }
        }

        match self.db.attachments().begin_refcount_delete(id).await? {
            RefcountDecision::BlobRetained | RefcountDecision::NoBlob => {}
            RefcountDecision::BlobDeletable { storage_key } => {
                if let Err(e) = self.blob_store.delete(&storage_key).await {
                    // Leave the soft-deleted row for the cleanup job.
                    warn!(attachment_id = %id, error = %e, "Blob delete failed; deferring to cleanup");
                    return Err(e.into());
                }
                self.db.attachments().finish_delete(id).await?;
            }
        }

        info!(attachment_id = %id, "Attachment deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_token_round_trip() {
        let signer = DownloadTokenSigner::new(None).unwrap();
        let id = Uuid::new_v4();
        let token = signer.sign(id, Utc::now() + chrono::Duration::minutes(5));
        assert_eq!(signer.verify(&token, Utc::now()).unwrap(), id);
    }

    #[test]
    fn expired_token_is_rejected() {
        let signer = DownloadTokenSigner::new(None).unwrap();
        let id = Uuid::new_v4();
        let token = signer.sign(id, Utc::now() - chrono::Duration::seconds(1));
        assert!(matches!(
            signer.verify(&token, Utc::now()),
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let signer = DownloadTokenSigner::new(None).unwrap();
        let token = signer.sign(Uuid::new_v4(), Utc::now() + chrono::Duration::minutes(5));

        // Re-encode with a different attachment id but the original tag.
        let raw = String::from_utf8(URL_SAFE_NO_PAD.decode(&token).unwrap()).unwrap();
        let mut parts: Vec<&str> = raw.splitn(3, '.').collect();
        let other_id = Uuid::new_v4().to_string();
        parts[0] = &other_id;
        let forged = URL_SAFE_NO_PAD.encode(parts.join("."));

        assert!(signer.verify(&forged, Utc::now()).is_err());
        assert!(signer.verify("not-base64!!", Utc::now()).is_err());
    }

    #[test]
    fn keys_differ_between_signers() {
        let a = DownloadTokenSigner::new(None).unwrap();
        let b = DownloadTokenSigner::new(None).unwrap();
        let id = Uuid::new_v4();
        let token = a.sign(id, Utc::now() + chrono::Duration::minutes(5));
        assert!(b.verify(&token, Utc::now()).is_err());
    }

    #[test]
    fn configured_key_is_stable() {
        use base64::engine::general_purpose::STANDARD;
        let encoded = STANDARD.encode([3u8; 32]);
        let a = DownloadTokenSigner::new(Some(&encoded)).unwrap();
        let b = DownloadTokenSigner::new(Some(&encoded)).unwrap();
        let id = Uuid::new_v4();
        let token = a.sign(id, Utc::now() + chrono::Duration::minutes(5));
        assert_eq!(b.verify(&token, Utc::now()).unwrap(), id);
    }
}
