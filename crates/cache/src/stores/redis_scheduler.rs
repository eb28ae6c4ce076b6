use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::Value;

use treejar_core::domain::batch::{DeferredJob, JobId};

use super::{map_redis_error, ttl_ms, CacheError, JobScheduler, ScheduledJob};
use crate::connection::{self, prefixed};

const CLAIM_DUE: &str = r#"
    local delayed_key = KEYS[1]
    local payload_key = KEYS[2]
    local now_ms = ARGV[1]
    local limit = tonumber(ARGV[2])

    local due = redis.call('ZRANGEBYSCORE', delayed_key, '-inf', now_ms, 'LIMIT', 0, limit)
    local claimed = {}
    for _, job_id in ipairs(due) do
        redis.call('ZREM', delayed_key, job_id)
        local payload = redis.call('HGET', payload_key, job_id)
        redis.call('HDEL', payload_key, job_id)
        if payload then
            table.insert(claimed, payload)
        end
    end
    return claimed
"#;

/// Deferred jobs in a sorted set scored by run-at millis, payloads in a hash.
#[derive(Clone)]
pub struct RedisJobScheduler {
    manager: ConnectionManager,
    delayed_key: String,
    payload_key: String,
}

impl RedisJobScheduler {
    pub fn new(manager: ConnectionManager, prefix: &str) -> Self {
        Self {
            manager,
            delayed_key: prefixed(prefix, "jobs:delayed"),
            payload_key: prefixed(prefix, "jobs:payloads"),
        }
    }

    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, CacheError> {
        let manager = connection::connect(redis_url).await?;
        Ok(Self::new(manager, prefix))
    }

    fn serialize(job: &DeferredJob) -> Result<String, CacheError> {
        serde_json::to_string(job).map_err(|err| CacheError::Serialization(err.to_string()))
    }

    fn deserialize(payload: &str) -> Result<DeferredJob, CacheError> {
        serde_json::from_str(payload).map_err(|err| CacheError::Serialization(err.to_string()))
    }
}

#[async_trait]
impl JobScheduler for RedisJobScheduler {
    async fn schedule_deferred(
        &self,
        job: &DeferredJob,
        delay: Duration,
    ) -> Result<ScheduledJob, CacheError> {
        let payload = Self::serialize(job)?;
        let run_at_ms = Utc::now().timestamp_millis() + ttl_ms(delay) as i64;
        let mut conn = self.manager.clone();

        let mut pipeline = redis::pipe();
        pipeline.atomic();
        pipeline.cmd("HSET").arg(&self.payload_key).arg(job.job_id.as_str()).arg(payload);
        pipeline.cmd("ZADD").arg(&self.delayed_key).arg(run_at_ms).arg(job.job_id.as_str());
        let _: Vec<Value> = pipeline.query_async(&mut conn).await.map_err(map_redis_error)?;

        Ok(ScheduledJob { job: job.clone(), run_at_ms })
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<DeferredJob>, CacheError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now_ms = Utc::now().timestamp_millis();
        let mut conn = self.manager.clone();
        let script = redis::Script::new(CLAIM_DUE);
        let payloads: Vec<String> = script
            .key(&self.delayed_key)
            .key(&self.payload_key)
            .arg(now_ms)
            .arg(limit as i64)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        let mut jobs = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match Self::deserialize(&payload) {
                Ok(job) => jobs.push(job),
                Err(error) => {
                    tracing::warn!(
                        event_name = "scheduler.job.decode_failed",
                        error = %error,
                        "dropping undecodable deferred job payload"
                    );
                }
            }
        }
        Ok(jobs)
    }

    async fn pending(&self, job_id: &JobId) -> Result<Option<ScheduledJob>, CacheError> {
        let mut conn = self.manager.clone();
        let (score, payload): (Option<f64>, Option<String>) = redis::pipe()
            .cmd("ZSCORE")
            .arg(&self.delayed_key)
            .arg(job_id.as_str())
            .cmd("HGET")
            .arg(&self.payload_key)
            .arg(job_id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        match (score, payload) {
            (Some(score), Some(payload)) => {
                Ok(Some(ScheduledJob { job: Self::deserialize(&payload)?, run_at_ms: score as i64 }))
            }
            _ => Ok(None),
        }
    }
}
