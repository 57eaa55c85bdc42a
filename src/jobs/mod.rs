//! Background workers: eviction, attachment cleanup, vector indexing, and
//! the at-least-once task queue. Each runs on its own timer loop under a
//! shared root cancellation token.

mod attachment_cleanup;
mod eviction;
mod indexer;
mod task_processor;

pub use attachment_cleanup::{AttachmentCleanup, start_cleanup_worker};
pub use eviction::{EvictionProgress, EvictionRunResult, EvictionService, start_eviction_worker};
pub use indexer::{VectorIndexer, start_indexer_worker};
pub use task_processor::{
    BlobDeleteHandler, TaskHandler, TaskProcessor, TaskProcessorBuilder, start_task_worker,
};
