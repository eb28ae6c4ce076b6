use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use treejar_core::domain::batch::{DeferredJob, JobId};

pub mod memory;
pub mod redis_cache;
pub mod redis_scheduler;

pub use memory::{InMemoryJobScheduler, InMemorySharedCache};
pub use redis_cache::RedisSharedCache;
pub use redis_scheduler::RedisJobScheduler;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("shared cache unavailable: {0}")]
    Unavailable(String),
    #[error("shared cache operation failed: {0}")]
    Operation(String),
    #[error("shared cache serialization failed: {0}")]
    Serialization(String),
}

impl From<CacheError> for treejar_core::ApplicationError {
    fn from(value: CacheError) -> Self {
        Self::Cache(value.to_string())
    }
}

/// Network-visible key-value store used for cross-process coordination.
///
/// Every operation is atomic on its own. Values are opaque strings; callers own encoding.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value`, replacing any previous one. `ttl = None` keeps it until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Stores `value` only if `key` is absent. Returns `true` when this call created the key.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Deletes `key` only while it still holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CacheError>;

    /// Appends to the list at `key` and returns the new length.
    async fn list_append(&self, key: &str, value: &str) -> Result<u64, CacheError>;

    /// Reads and clears the list at `key` in one step. Missing keys drain as empty.
    async fn list_drain_all(&self, key: &str) -> Result<Vec<String>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduledJob {
    pub job: DeferredJob,
    /// Scheduler-clock deadline in milliseconds.
    pub run_at_ms: i64,
}

/// Delayed job queue keyed by deterministic job ids.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Schedules `job` to fire after `delay`. An outstanding job with the same id is
    /// replaced, so repeated calls push its deadline forward instead of queueing twice.
    async fn schedule_deferred(
        &self,
        job: &DeferredJob,
        delay: Duration,
    ) -> Result<ScheduledJob, CacheError>;

    /// Removes and returns up to `limit` due jobs. A job is handed to one caller only.
    async fn claim_due(&self, limit: usize) -> Result<Vec<DeferredJob>, CacheError>;

    async fn pending(&self, job_id: &JobId) -> Result<Option<ScheduledJob>, CacheError>;
}

pub(crate) fn ttl_ms(ttl: Duration) -> u64 {
    let ms = ttl.as_millis() as u64;
    if ms == 0 {
        1
    } else {
        ms
    }
}

pub(crate) fn map_redis_error(err: redis::RedisError) -> CacheError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        CacheError::Unavailable(err.to_string())
    } else {
        CacheError::Operation(err.to_string())
    }
}
