use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use treejar_cache::{JobScheduler, ScheduledJob, SharedCache};
use treejar_core::config::ResilienceConfig;
use treejar_core::domain::batch::{BufferedEvent, DeferredJob, GroupKey, JobInstruction, PendingBatch};

use crate::errors::DebounceError;
use crate::sleep::{Sleeper, TokioSleeper};

/// Business-logic collaborator that receives each drained batch.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batch: &PendingBatch) -> anyhow::Result<()>;
}

/// Buffers events per group key and keeps exactly one deferred drain job per key.
pub struct EventDebouncer {
    cache: Arc<dyn SharedCache>,
    scheduler: Arc<dyn JobScheduler>,
    delay: Duration,
}

impl EventDebouncer {
    pub fn new(
        cache: Arc<dyn SharedCache>,
        scheduler: Arc<dyn JobScheduler>,
        delay: Duration,
    ) -> Self {
        Self { cache, scheduler, delay }
    }

    pub fn from_config(
        cache: Arc<dyn SharedCache>,
        scheduler: Arc<dyn JobScheduler>,
        config: &ResilienceConfig,
    ) -> Self {
        Self::new(cache, scheduler, config.debounce_delay())
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Appends `event` to the key's buffer and pushes the drain job out to `now + delay`.
    pub async fn on_event(
        &self,
        group_key: &GroupKey,
        event: &BufferedEvent,
    ) -> Result<ScheduledJob, DebounceError> {
        let encoded = serde_json::to_string(event)
            .map_err(|error| DebounceError::Serialization(error.to_string()))?;
        let buffered = self.cache.list_append(&group_key.events_key(), &encoded).await?;
        let scheduled =
            self.scheduler.schedule_deferred(&DeferredJob::drain(group_key.clone()), self.delay).await?;

        info!(
            event_name = "ingress.webhook.event_buffered",
            group_key = %group_key,
            event_id = %event.event_id,
            buffered,
            job_id = %scheduled.job.job_id,
            "event buffered and drain job rescheduled"
        );
        Ok(scheduled)
    }

    /// Atomically takes everything buffered for `group_key`. An empty buffer yields `None`.
    pub async fn drain(&self, group_key: &GroupKey) -> Result<Option<PendingBatch>, DebounceError> {
        let raw = self.cache.list_drain_all(&group_key.events_key()).await?;
        let mut events = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_str::<BufferedEvent>(&item) {
                Ok(event) => events.push(event),
                Err(error) => warn!(
                    event_name = "worker.batch.event_dropped",
                    group_key = %group_key,
                    error = %error,
                    "dropping undecodable buffered event"
                ),
            }
        }

        if events.is_empty() {
            debug!(
                event_name = "worker.batch.empty",
                group_key = %group_key,
                "nothing buffered; drain is a no-op"
            );
            return Ok(None);
        }

        let batch = PendingBatch::from_drained(group_key.clone(), events);
        info!(
            event_name = "worker.batch.drained",
            group_key = %group_key,
            batch_size = batch.len(),
            "buffered events drained"
        );
        Ok(Some(batch))
    }

    pub async fn claim_due(&self, limit: usize) -> Result<Vec<DeferredJob>, DebounceError> {
        Ok(self.scheduler.claim_due(limit).await?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerPolicy {
    pub poll_interval: Duration,
    pub claim_limit: usize,
    pub handler_max_attempts: u32,
    pub backoff_base_secs: u64,
}

impl Default for WorkerPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            claim_limit: 32,
            handler_max_attempts: 3,
            backoff_base_secs: 2,
        }
    }
}

impl WorkerPolicy {
    pub fn from_config(config: &ResilienceConfig, poll_interval_ms: u64) -> Self {
        Self {
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
            handler_max_attempts: config.max_attempts.max(1),
            backoff_base_secs: config.backoff_base_secs,
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.backoff_base_secs.saturating_pow(attempt.min(16)))
    }
}

/// Fires due drain jobs and hands non-empty batches to the handler.
pub struct BatchWorker {
    debouncer: Arc<EventDebouncer>,
    handler: Arc<dyn BatchHandler>,
    policy: WorkerPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl BatchWorker {
    pub fn new(
        debouncer: Arc<EventDebouncer>,
        handler: Arc<dyn BatchHandler>,
        policy: WorkerPolicy,
    ) -> Self {
        Self { debouncer, handler, policy, sleeper: Arc::new(TokioSleeper) }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Polls until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            event_name = "worker.started",
            poll_interval_ms = self.policy.poll_interval.as_millis() as u64,
            "batch worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(error) = self.run_once().await {
                warn!(
                    event_name = "worker.poll_failed",
                    error = %error,
                    "claiming due jobs failed; retrying on next tick"
                );
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.policy.poll_interval) => {}
            }
        }

        info!(event_name = "worker.stopped", "batch worker stopped");
    }

    /// Claims and processes every currently due job. Returns how many jobs fired.
    pub async fn run_once(&self) -> Result<usize, DebounceError> {
        let jobs = self.debouncer.claim_due(self.policy.claim_limit).await?;
        let fired = jobs.len();
        for job in jobs {
            if let Err(error) = self.process_job(&job).await {
                error!(
                    event_name = "worker.batch.failed",
                    job_id = %job.job_id,
                    group_key = %job.group_key,
                    error = %error,
                    "deferred job failed"
                );
            }
        }
        Ok(fired)
    }

    /// Runs one fired job. Returns the number of events handed to the handler.
    pub async fn process_job(&self, job: &DeferredJob) -> Result<usize, DebounceError> {
        match job.instruction {
            JobInstruction::DrainAndProcess => {}
        }

        let Some(batch) = self.debouncer.drain(&job.group_key).await? else {
            return Ok(0);
        };

        let max_attempts = self.policy.handler_max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.handler.handle(&batch).await {
                Ok(()) => {
                    info!(
                        event_name = "worker.batch.processed",
                        group_key = %batch.group_key,
                        batch_size = batch.len(),
                        attempt,
                        "batch handed to business logic"
                    );
                    return Ok(batch.len());
                }
                Err(handler_error) if attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        event_name = "worker.batch.retry",
                        group_key = %batch.group_key,
                        batch_size = batch.len(),
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %handler_error,
                        "batch handler failed; retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(handler_error) => {
                    return Err(DebounceError::HandlerExhausted {
                        group_key: batch.group_key.to_string(),
                        attempts: attempt,
                        message: format!("{handler_error:#} (batch_size={})", batch.len()),
                    });
                }
            }
        }
    }
}
