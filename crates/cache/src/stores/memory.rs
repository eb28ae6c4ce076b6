use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use treejar_core::domain::batch::{DeferredJob, JobId};

use super::{CacheError, JobScheduler, ScheduledJob, SharedCache};

#[derive(Debug)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|deadline| now < deadline).unwrap_or(true)
    }
}

#[derive(Debug, Default)]
struct CacheState {
    values: HashMap<String, StoredValue>,
    lists: HashMap<String, Vec<String>>,
}

impl CacheState {
    fn live_value(&mut self, key: &str, now: Instant) -> Option<&StoredValue> {
        let expired = self.values.get(key).map(|stored| !stored.is_live(now)).unwrap_or(false);
        if expired {
            self.values.remove(key);
        }
        self.values.get(key)
    }
}

/// Single-process cache. Expiry follows the tokio clock, so paused-time tests can
/// advance past a TTL without sleeping.
#[derive(Debug)]
pub struct InMemorySharedCache {
    state: Mutex<CacheState>,
    available: AtomicBool,
}

impl Default for InMemorySharedCache {
    fn default() -> Self {
        Self { state: Mutex::new(CacheState::default()), available: AtomicBool::new(true) }
    }
}

impl InMemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: every operation fails with `CacheError::Unavailable` until restored.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable("in-memory cache marked unavailable".to_string()))
        }
    }
}

#[async_trait]
impl SharedCache for InMemorySharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        Ok(state.live_value(key, Instant::now()).map(|stored| stored.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        state.values.insert(key.to_string(), StoredValue { value: value.to_string(), expires_at });
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if state.live_value(key, now).is_some() {
            return Ok(false);
        }
        state.values.insert(
            key.to_string(),
            StoredValue { value: value.to_string(), expires_at: Some(now + ttl) },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let live = state.live_value(key, Instant::now()).is_some();
        state.values.remove(key);
        let list = state.lists.remove(key).is_some();
        Ok(live || list)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let matches = state
            .live_value(key, Instant::now())
            .map(|stored| stored.value == expected)
            .unwrap_or(false);
        if matches {
            state.values.remove(key);
        }
        Ok(matches)
    }

    async fn list_append(&self, key: &str, value: &str) -> Result<u64, CacheError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let list = state.lists.entry(key.to_string()).or_default();
        list.push(value.to_string());
        Ok(list.len() as u64)
    }

    async fn list_drain_all(&self, key: &str) -> Result<Vec<String>, CacheError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        Ok(state.lists.remove(key).unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.ensure_available()
    }
}

#[derive(Debug)]
struct QueuedJob {
    job: DeferredJob,
    run_at: Instant,
}

#[derive(Debug)]
pub struct InMemoryJobScheduler {
    origin: Instant,
    jobs: Mutex<HashMap<JobId, QueuedJob>>,
}

impl Default for InMemoryJobScheduler {
    fn default() -> Self {
        Self { origin: Instant::now(), jobs: Mutex::new(HashMap::new()) }
    }
}

impl InMemoryJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn millis_since_origin(&self, at: Instant) -> i64 {
        at.saturating_duration_since(self.origin).as_millis() as i64
    }
}

#[async_trait]
impl JobScheduler for InMemoryJobScheduler {
    async fn schedule_deferred(
        &self,
        job: &DeferredJob,
        delay: Duration,
    ) -> Result<ScheduledJob, CacheError> {
        let run_at = Instant::now() + delay;
        let mut jobs = self.jobs.lock().await;
        jobs.insert(job.job_id.clone(), QueuedJob { job: job.clone(), run_at });
        Ok(ScheduledJob { job: job.clone(), run_at_ms: self.millis_since_origin(run_at) })
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<DeferredJob>, CacheError> {
        let now = Instant::now();
        let mut jobs = self.jobs.lock().await;
        let mut due: Vec<(Instant, JobId)> = jobs
            .iter()
            .filter(|(_, queued)| queued.run_at <= now)
            .map(|(job_id, queued)| (queued.run_at, job_id.clone()))
            .collect();
        due.sort_by_key(|(run_at, _)| *run_at);
        due.truncate(limit);

        Ok(due.into_iter().filter_map(|(_, job_id)| jobs.remove(&job_id)).map(|q| q.job).collect())
    }

    async fn pending(&self, job_id: &JobId) -> Result<Option<ScheduledJob>, CacheError> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.get(job_id).map(|queued| ScheduledJob {
            job: queued.job.clone(),
            run_at_ms: self.millis_since_origin(queued.run_at),
        }))
    }
}
