use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Response recorder (resume) configuration.
///
/// The locator KV routes resume requests to the node holding the live
/// buffer. With `kind = "none"` the whole feature is disabled and resume
/// endpoints return `unimplemented`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResumerConfig {
    #[serde(default)]
    pub kind: ResumerKind,

    /// Redis connection URL; required when `kind = "redis"`.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Node id written into the locator. Defaults to the hostname.
    #[serde(default)]
    pub node_id: Option<String>,

    /// In-memory chunks buffered per session before spilling readers to the
    /// temp file.
    #[serde(default = "default_buffer_chunks")]
    pub buffer_chunks: usize,

    /// Directory for per-session spill files. Defaults to the OS temp dir.
    #[serde(default)]
    pub spill_dir: Option<String>,

    /// Locator entry TTL, in seconds.
    #[serde(default = "default_locator_ttl_secs")]
    pub locator_ttl_secs: u64,

    /// How long a finished session stays replayable for late resumes, in
    /// seconds.
    #[serde(default = "default_retain_secs")]
    pub retain_completed_secs: u64,
}

/// Locator backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumerKind {
    /// Resume disabled.
    #[default]
    None,
    /// Redis-backed locator. Requires the `redis` feature.
    Redis,
    /// Process-local locator. Single-node deployments and tests.
    Memory,
}

impl Default for ResumerConfig {
    fn default() -> Self {
        Self {
            kind: ResumerKind::None,
            redis_url: None,
            node_id: None,
            buffer_chunks: default_buffer_chunks(),
            spill_dir: None,
            locator_ttl_secs: default_locator_ttl_secs(),
            retain_completed_secs: default_retain_secs(),
        }
    }
}

impl ResumerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kind == ResumerKind::Redis {
            if self.redis_url.is_none() {
                return Err(ConfigError::Validation(
                    "resumer.kind = \"redis\" requires resumer.redis_url".into(),
                ));
            }
            #[cfg(not(feature = "redis"))]
            return Err(ConfigError::Validation(
                "resumer.kind = \"redis\" requires the 'redis' feature. \
                 Rebuild with: cargo build --features redis"
                    .into(),
            ));
        }
        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.kind != ResumerKind::None
    }

    pub fn locator_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.locator_ttl_secs)
    }

    pub fn retain_completed(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retain_completed_secs)
    }
}

fn default_buffer_chunks() -> usize {
    256
}

fn default_locator_ttl_secs() -> u64 {
    10 * 60
}

fn default_retain_secs() -> u64 {
    60
}
