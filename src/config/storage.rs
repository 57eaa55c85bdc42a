use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Blob storage backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobStoreKind {
    /// Attachment bytes live in the database (`attachment_file_chunks`).
    #[default]
    Db,
    /// S3-compatible object storage. Requires the `s3-storage` feature.
    S3,
}

/// Attachment and blob storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlobStoreConfig {
    #[serde(default)]
    pub kind: BlobStoreKind,

    /// S3 settings; required when `kind = "s3"`.
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,

    /// Maximum attachment size in bytes. Uploads beyond this abort with
    /// `file_too_large`.
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: i64,

    /// Expiry stamped on the metadata row while the bytes are still being
    /// streamed in. Kept short so failed uploads are reaped quickly.
    #[serde(default = "default_upload_expiration_secs")]
    pub upload_expiration_secs: u64,

    /// Default expiry for a completed but unlinked attachment.
    #[serde(default = "default_expiration_secs")]
    pub default_expiration_secs: u64,

    /// Upper bound a client may request for unlinked expiry.
    #[serde(default = "default_max_expiration_secs")]
    pub max_expiration_secs: u64,

    /// Lifetime of signed download URLs/tokens.
    #[serde(default = "default_download_url_ttl_secs")]
    pub download_url_ttl_secs: u64,

    /// HMAC key for signed download tokens, base64 or hex. When unset an
    /// ephemeral key is generated at startup, invalidating outstanding
    /// tokens on restart.
    #[serde(default)]
    pub download_token_key: Option<String>,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            kind: BlobStoreKind::Db,
            s3: None,
            max_attachment_bytes: default_max_attachment_bytes(),
            upload_expiration_secs: default_upload_expiration_secs(),
            default_expiration_secs: default_expiration_secs(),
            max_expiration_secs: default_max_expiration_secs(),
            download_url_ttl_secs: default_download_url_ttl_secs(),
            download_token_key: None,
        }
    }
}

impl BlobStoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kind == BlobStoreKind::S3 && self.s3.is_none() {
            return Err(ConfigError::Validation(
                "storage.kind = \"s3\" requires a [storage.s3] section".into(),
            ));
        }
        if self.max_attachment_bytes <= 0 {
            return Err(ConfigError::Validation(
                "storage.max_attachment_bytes must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// S3-compatible object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3StorageConfig {
    pub bucket: String,

    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint for MinIO, R2, Spaces, and friends.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Static credentials. When unset the ambient AWS credential chain is
    /// used.
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Path-style addressing, required by most non-AWS endpoints.
    #[serde(default)]
    pub force_path_style: bool,

    /// Key prefix for all blobs, e.g. `mnemo/attachments/`.
    #[serde(default)]
    pub key_prefix: Option<String>,
}

fn default_max_attachment_bytes() -> i64 {
    100 * 1024 * 1024
}

fn default_upload_expiration_secs() -> u64 {
    60
}

fn default_expiration_secs() -> u64 {
    60 * 60
}

fn default_max_expiration_secs() -> u64 {
    24 * 60 * 60
}

fn default_download_url_ttl_secs() -> u64 {
    5 * 60
}
