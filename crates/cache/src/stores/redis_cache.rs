use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{map_redis_error, ttl_ms, CacheError, SharedCache};
use crate::connection::{self, prefixed};

const COMPARE_AND_DELETE: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

#[derive(Clone)]
pub struct RedisSharedCache {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisSharedCache {
    pub fn new(manager: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self { manager, prefix: prefix.into() }
    }

    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, CacheError> {
        let manager = connection::connect(redis_url).await?;
        Ok(Self::new(manager, prefix))
    }

    fn key(&self, key: &str) -> String {
        prefixed(&self.prefix, key)
    }
}

#[async_trait]
impl SharedCache for RedisSharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        conn.get(self.key(key)).await.map_err(map_redis_error)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_ms(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(map_redis_error)?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(result.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let removed: i64 = conn.del(self.key(key)).await.map_err(map_redis_error)?;
        Ok(removed > 0)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let script = redis::Script::new(COMPARE_AND_DELETE);
        let removed: i64 = script
            .key(self.key(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(removed > 0)
    }

    async fn list_append(&self, key: &str, value: &str) -> Result<u64, CacheError> {
        let mut conn = self.manager.clone();
        conn.rpush(self.key(key), value).await.map_err(map_redis_error)
    }

    async fn list_drain_all(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let key = self.key(key);
        let mut conn = self.manager.clone();
        let mut pipeline = redis::pipe();
        pipeline.atomic();
        pipeline.cmd("LRANGE").arg(&key).arg(0).arg(-1);
        pipeline.cmd("DEL").arg(&key).ignore();
        let (items,): (Vec<String>,) =
            pipeline.query_async(&mut conn).await.map_err(map_redis_error)?;
        Ok(items)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let reply: String =
            redis::cmd("PING").query_async(&mut conn).await.map_err(map_redis_error)?;
        if reply.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(CacheError::Operation(format!("unexpected PING reply `{reply}`")))
        }
    }
}
