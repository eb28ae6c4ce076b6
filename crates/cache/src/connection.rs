use redis::aio::ConnectionManager;

use crate::stores::CacheError;

pub type RedisManager = ConnectionManager;

/// Opens a reconnecting Redis connection shared by the cache and the scheduler.
pub async fn connect(redis_url: &str) -> Result<RedisManager, CacheError> {
    let client =
        redis::Client::open(redis_url).map_err(|err| CacheError::Unavailable(err.to_string()))?;
    ConnectionManager::new(client).await.map_err(|err| CacheError::Unavailable(err.to_string()))
}

pub(crate) fn prefixed(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}:{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::prefixed;

    #[test]
    fn prefix_is_optional() {
        assert_eq!(prefixed("treejar", "zoho_crm:lock"), "treejar:zoho_crm:lock");
        assert_eq!(prefixed("", "events:42"), "events:42");
    }
}
