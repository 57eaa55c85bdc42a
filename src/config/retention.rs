use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Background job scheduling: eviction, attachment cleanup, and the task
/// processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Master switch for all background workers.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long a soft-deleted group survives before the eviction service
    /// hard-deletes it, in seconds.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Eviction tick interval, in seconds.
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,

    /// Groups hard-deleted per eviction tick.
    #[serde(default = "default_eviction_batch_size")]
    pub eviction_batch_size: i64,

    /// Attachment cleanup tick interval, in seconds.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Attachments processed per cleanup tick.
    #[serde(default = "default_cleanup_batch_size")]
    pub cleanup_batch_size: i64,

    /// Task processor poll interval, in seconds.
    #[serde(default = "default_task_interval_secs")]
    pub task_interval_secs: u64,

    /// Tasks claimed per poll.
    #[serde(default = "default_task_batch_size")]
    pub task_batch_size: i64,

    /// Base backoff after a failed task, in seconds; doubles per retry up
    /// to an hour.
    #[serde(default = "default_task_backoff_secs")]
    pub task_backoff_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace_secs: default_grace_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
            eviction_batch_size: default_eviction_batch_size(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            cleanup_batch_size: default_cleanup_batch_size(),
            task_interval_secs: default_task_interval_secs(),
            task_batch_size: default_task_batch_size(),
            task_backoff_secs: default_task_backoff_secs(),
        }
    }
}

impl RetentionConfig {
    pub fn grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_secs as i64)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn task_interval(&self) -> Duration {
        Duration::from_secs(self.task_interval_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_grace_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_eviction_interval_secs() -> u64 {
    60 * 60
}

fn default_eviction_batch_size() -> i64 {
    100
}

fn default_cleanup_interval_secs() -> u64 {
    5 * 60
}

fn default_cleanup_batch_size() -> i64 {
    200
}

fn default_task_interval_secs() -> u64 {
    5
}

fn default_task_batch_size() -> i64 {
    20
}

fn default_task_backoff_secs() -> u64 {
    30
}
