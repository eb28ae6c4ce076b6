use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use treejar_cache::SharedCache;
use treejar_core::config::ResilienceConfig;
use treejar_core::domain::token::{CachedToken, ProviderId, RefreshLock};

use crate::errors::AuthError;
use crate::oauth::TokenSource;
use crate::sleep::{Sleeper, TokioSleeper};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPolicy {
    pub lock_ttl: Duration,
    pub lock_poll_interval: Duration,
    pub lock_poll_attempts: u32,
    pub safety_margin_secs: i64,
    pub min_ttl_secs: i64,
    pub default_expires_in_secs: i64,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for TokenPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            lock_ttl: config.lock_ttl(),
            lock_poll_interval: config.lock_poll_interval(),
            lock_poll_attempts: config.lock_poll_attempts,
            safety_margin_secs: config.token_safety_margin_secs as i64,
            min_ttl_secs: config.min_token_ttl_secs as i64,
            default_expires_in_secs: 3_600,
        }
    }
}

impl TokenPolicy {
    /// Cache lifetime for a token the server says is valid for `expires_in` seconds.
    pub fn cache_ttl(&self, expires_in: Option<i64>) -> Duration {
        let expires_in = expires_in.unwrap_or(self.default_expires_in_secs);
        let secs = expires_in.saturating_sub(self.safety_margin_secs).max(self.min_ttl_secs);
        Duration::from_secs(secs.max(1) as u64)
    }
}

/// Per-provider single-flight token acquisition over the shared cache.
///
/// The cached token is the only state shared between processes. A refresh happens only
/// while holding the provider's TTL-bounded lock; everyone else polls the cache.
pub struct TokenBroker {
    cache: Arc<dyn SharedCache>,
    sources: HashMap<ProviderId, Arc<dyn TokenSource>>,
    policy: TokenPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl TokenBroker {
    pub fn new(cache: Arc<dyn SharedCache>, policy: TokenPolicy) -> Self {
        Self { cache, sources: HashMap::new(), policy, sleeper: Arc::new(TokioSleeper) }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn register(mut self, provider: ProviderId, source: Arc<dyn TokenSource>) -> Self {
        self.sources.insert(provider, source);
        self
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderId> {
        self.sources.keys()
    }

    pub async fn get_token(&self, provider: &ProviderId) -> Result<CachedToken, AuthError> {
        let source = self
            .sources
            .get(provider)
            .cloned()
            .ok_or_else(|| AuthError::UnknownProvider(provider.to_string()))?;

        if let Some(token) = self.read_cached(provider).await? {
            debug!(
                event_name = "integration.token.cache_hit",
                provider = %provider,
                "using cached access token"
            );
            return Ok(token);
        }

        let lock = RefreshLock::new(provider.clone(), uuid::Uuid::new_v4().to_string());
        let acquired =
            self.cache.set_if_absent(&lock.key(), &lock.holder_token, self.policy.lock_ttl).await?;

        if acquired {
            let outcome = self.refresh_while_holding(provider, source.as_ref()).await;
            self.release_lock(&lock).await;
            return outcome;
        }

        self.wait_for_refresh(provider).await
    }

    /// Drops the cached token so the next `get_token` refreshes.
    pub async fn invalidate(&self, provider: &ProviderId) -> Result<(), AuthError> {
        let removed = self.cache.delete(&provider.token_key()).await?;
        info!(
            event_name = "integration.token.invalidated",
            provider = %provider,
            removed,
            "cached access token invalidated"
        );
        Ok(())
    }

    async fn read_cached(&self, provider: &ProviderId) -> Result<Option<CachedToken>, AuthError> {
        let Some(raw) = self.cache.get(&provider.token_key()).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<CachedToken>(&raw) {
            Ok(token) if token.is_valid_at(Utc::now()) => Ok(Some(token)),
            Ok(_) => Ok(None),
            Err(error) => {
                warn!(
                    event_name = "integration.token.cache_corrupt",
                    provider = %provider,
                    error = %error,
                    "ignoring undecodable cached token"
                );
                Ok(None)
            }
        }
    }

    async fn refresh_while_holding(
        &self,
        provider: &ProviderId,
        source: &dyn TokenSource,
    ) -> Result<CachedToken, AuthError> {
        if let Some(token) = self.read_cached(provider).await? {
            debug!(
                event_name = "integration.token.cache_hit",
                provider = %provider,
                "token appeared before refresh"
            );
            return Ok(token);
        }

        let grant = source.refresh(provider).await.map_err(|error| {
            warn!(
                event_name = "integration.token.refresh_failed",
                provider = %provider,
                error = %error,
                "access token refresh failed"
            );
            error
        })?;

        if grant.access_token.trim().is_empty() {
            return Err(AuthError::MalformedGrant {
                provider: provider.to_string(),
                message: "grant has no access_token".to_string(),
            });
        }

        let ttl = self.policy.cache_ttl(grant.expires_in);
        let token = CachedToken {
            provider_id: provider.clone(),
            token_value: grant.access_token,
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(
                    self.policy.min_ttl_secs,
                )),
        };
        let encoded = serde_json::to_string(&token).map_err(|error| AuthError::MalformedGrant {
            provider: provider.to_string(),
            message: error.to_string(),
        })?;
        self.cache.set(&provider.token_key(), &encoded, Some(ttl)).await?;

        info!(
            event_name = "integration.token.refreshed",
            provider = %provider,
            ttl_secs = ttl.as_secs(),
            "access token refreshed"
        );
        Ok(token)
    }

    async fn wait_for_refresh(&self, provider: &ProviderId) -> Result<CachedToken, AuthError> {
        debug!(
            event_name = "integration.token.lock_wait",
            provider = %provider,
            poll_attempts = self.policy.lock_poll_attempts,
            "another caller is refreshing; waiting for token"
        );

        for _ in 0..self.policy.lock_poll_attempts {
            self.sleeper.sleep(self.policy.lock_poll_interval).await;
            if let Some(token) = self.read_cached(provider).await? {
                return Ok(token);
            }
        }

        warn!(
            event_name = "integration.token.lock_timeout",
            provider = %provider,
            "gave up waiting for token refresh"
        );
        Err(AuthError::LockTimeout { provider: provider.to_string() })
    }

    async fn release_lock(&self, lock: &RefreshLock) {
        match self.cache.delete_if_equals(&lock.key(), &lock.holder_token).await {
            Ok(true) => {}
            Ok(false) => debug!(
                event_name = "integration.token.lock_lost",
                provider = %lock.provider_id,
                "refresh lock expired or was taken over before release"
            ),
            Err(error) => warn!(
                event_name = "integration.token.lock_release_failed",
                provider = %lock.provider_id,
                error = %error,
                "refresh lock release failed; it will expire on its own"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use treejar_cache::{InMemorySharedCache, SharedCache};
    use treejar_core::domain::token::{ProviderId, RefreshLock, TokenGrant};

    use super::{TokenBroker, TokenPolicy};
    use crate::errors::AuthError;
    use crate::oauth::TokenSource;

    #[derive(Default)]
    struct ScriptedSource {
        grants: Mutex<VecDeque<Result<TokenGrant, AuthError>>>,
        calls: Mutex<usize>,
    }

    impl ScriptedSource {
        fn with_script(grants: Vec<Result<TokenGrant, AuthError>>) -> Self {
            Self { grants: Mutex::new(grants.into()), calls: Mutex::new(0) }
        }

        async fn calls(&self) -> usize {
            *self.calls.lock().await
        }
    }

    #[async_trait]
    impl TokenSource for ScriptedSource {
        async fn refresh(&self, provider: &ProviderId) -> Result<TokenGrant, AuthError> {
            *self.calls.lock().await += 1;
            self.grants.lock().await.pop_front().unwrap_or_else(|| {
                Err(AuthError::RefreshFailed {
                    provider: provider.to_string(),
                    message: "script exhausted".to_owned(),
                })
            })
        }
    }

    fn grant(token: &str, expires_in: Option<i64>) -> Result<TokenGrant, AuthError> {
        Ok(TokenGrant { access_token: token.to_owned(), expires_in })
    }

    fn broker(cache: Arc<InMemorySharedCache>, source: Arc<ScriptedSource>) -> TokenBroker {
        TokenBroker::new(cache, TokenPolicy::default())
            .register(ProviderId::new("zoho_crm"), source)
    }

    #[test]
    fn cache_ttl_subtracts_margin_with_floor() {
        let policy = TokenPolicy::default();

        assert_eq!(policy.cache_ttl(Some(3600)), Duration::from_secs(3540));
        assert_eq!(policy.cache_ttl(Some(30)), Duration::from_secs(10));
        assert_eq!(policy.cache_ttl(None), Duration::from_secs(3540));
    }

    #[test]
    fn cache_ttl_clamps_out_of_range_expiry() {
        let policy = TokenPolicy::default();

        assert_eq!(policy.cache_ttl(Some(i64::MIN)), Duration::from_secs(10));
        assert_eq!(policy.cache_ttl(Some(-5)), Duration::from_secs(10));
        assert_eq!(policy.cache_ttl(Some(i64::MAX)), Duration::from_secs((i64::MAX - 60) as u64));
    }

    #[tokio::test]
    async fn release_leaves_lock_taken_over_by_another_holder() {
        let cache = Arc::new(InMemorySharedCache::new());
        let broker = broker(cache.clone(), Arc::new(ScriptedSource::default()));
        let provider = ProviderId::new("zoho_crm");
        cache
            .set_if_absent(&provider.lock_key(), "other-holder", Duration::from_secs(10))
            .await
            .expect("seed lock");

        broker.release_lock(&RefreshLock::new(provider.clone(), "expired-holder")).await;
        assert_eq!(
            cache.get(&provider.lock_key()).await.expect("get"),
            Some("other-holder".to_string())
        );

        broker.release_lock(&RefreshLock::new(provider.clone(), "other-holder")).await;
        assert_eq!(cache.get(&provider.lock_key()).await.expect("get"), None);
    }

    #[tokio::test]
    async fn refreshes_once_then_serves_from_cache() {
        let cache = Arc::new(InMemorySharedCache::new());
        let source = Arc::new(ScriptedSource::with_script(vec![grant("tok-1", Some(3600))]));
        let broker = broker(cache.clone(), source.clone());
        let provider = ProviderId::new("zoho_crm");

        let first = broker.get_token(&provider).await.expect("first token");
        let second = broker.get_token(&provider).await.expect("second token");

        assert_eq!(first.token_value, "tok-1");
        assert_eq!(second.token_value, "tok-1");
        assert_eq!(source.calls().await, 1);
        assert_eq!(cache.get("zoho_crm:lock").await, Ok(None));
    }

    #[tokio::test]
    async fn lock_is_released_when_refresh_fails() {
        let cache = Arc::new(InMemorySharedCache::new());
        let source = Arc::new(ScriptedSource::with_script(vec![Err(AuthError::RefreshFailed {
            provider: "zoho_crm".to_owned(),
            message: "invalid_client".to_owned(),
        })]));
        let broker = broker(cache.clone(), source.clone());

        let error = broker.get_token(&ProviderId::new("zoho_crm")).await.expect_err("should fail");

        assert!(matches!(error, AuthError::RefreshFailed { .. }));
        assert_eq!(cache.get("zoho_crm:lock").await, Ok(None));
        assert_eq!(cache.get("zoho_crm:access_token").await, Ok(None));
    }

    #[tokio::test]
    async fn empty_access_token_is_malformed() {
        let cache = Arc::new(InMemorySharedCache::new());
        let source = Arc::new(ScriptedSource::with_script(vec![grant("", Some(3600))]));
        let broker = broker(cache.clone(), source);

        let error = broker.get_token(&ProviderId::new("zoho_crm")).await.expect_err("should fail");

        assert!(matches!(error, AuthError::MalformedGrant { .. }));
        assert_eq!(cache.get("zoho_crm:lock").await, Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_times_out_when_holder_never_writes() {
        let cache = Arc::new(InMemorySharedCache::new());
        cache
            .set_if_absent("zoho_crm:lock", "stuck-holder", Duration::from_secs(60))
            .await
            .expect("seed lock");
        let source = Arc::new(ScriptedSource::with_script(vec![grant("tok-1", Some(3600))]));
        let broker = broker(cache, source.clone());

        let error = broker.get_token(&ProviderId::new("zoho_crm")).await.expect_err("should time out");

        assert_eq!(error.to_string(), "token refresh lock timeout");
        assert_eq!(source.calls().await, 0);
    }

    #[tokio::test]
    async fn invalidate_forces_next_refresh() {
        let cache = Arc::new(InMemorySharedCache::new());
        let source = Arc::new(ScriptedSource::with_script(vec![
            grant("tok-1", Some(3600)),
            grant("tok-2", Some(3600)),
        ]));
        let broker = broker(cache, source.clone());
        let provider = ProviderId::new("zoho_crm");

        broker.get_token(&provider).await.expect("first token");
        broker.invalidate(&provider).await.expect("invalidate");
        let refreshed = broker.get_token(&provider).await.expect("second token");

        assert_eq!(refreshed.token_value, "tok-2");
        assert_eq!(source.calls().await, 2);
    }

    #[tokio::test]
    async fn corrupt_cached_value_is_treated_as_miss() {
        let cache = Arc::new(InMemorySharedCache::new());
        cache.set("zoho_crm:access_token", "not-json", None).await.expect("seed");
        let source = Arc::new(ScriptedSource::with_script(vec![grant("tok-1", Some(3600))]));
        let broker = broker(cache, source.clone());

        let token = broker.get_token(&ProviderId::new("zoho_crm")).await.expect("token");

        assert_eq!(token.token_value, "tok-1");
        assert_eq!(source.calls().await, 1);
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let cache = Arc::new(InMemorySharedCache::new());
        let broker = TokenBroker::new(cache, TokenPolicy::default());

        let error = broker.get_token(&ProviderId::new("hubspot")).await.expect_err("unknown");

        assert_eq!(error, AuthError::UnknownProvider("hubspot".to_owned()));
    }
}
