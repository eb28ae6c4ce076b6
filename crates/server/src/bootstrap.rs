use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use treejar_cache::{connect, CacheError, JobScheduler, RedisJobScheduler, RedisSharedCache, SharedCache};
use treejar_core::config::{AppConfig, ConfigError, LoadOptions};
use treejar_integrations::providers::ProviderClients;
use treejar_integrations::{EventDebouncer, IntegrationError};

pub struct Application {
    pub config: AppConfig,
    pub cache: Arc<dyn SharedCache>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub providers: ProviderClients,
    pub debouncer: Arc<EventDebouncer>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("redis connection failed: {0}")]
    CacheConnect(#[source] CacheError),
    #[error("provider clients could not be built: {0}")]
    Providers(#[source] IntegrationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let manager = connect(&config.redis.url).await.map_err(BootstrapError::CacheConnect)?;
    info!(
        event_name = "system.bootstrap.redis_connected",
        correlation_id = "bootstrap",
        key_prefix = %config.redis.key_prefix,
        "redis connection established"
    );

    let cache: Arc<dyn SharedCache> =
        Arc::new(RedisSharedCache::new(manager.clone(), config.redis.key_prefix.clone()));
    let scheduler: Arc<dyn JobScheduler> =
        Arc::new(RedisJobScheduler::new(manager, &config.redis.key_prefix));

    assemble(config, cache, scheduler)
}

/// Wires provider clients and the debouncer over already-built backends.
pub fn assemble(
    config: AppConfig,
    cache: Arc<dyn SharedCache>,
    scheduler: Arc<dyn JobScheduler>,
) -> Result<Application, BootstrapError> {
    let providers =
        ProviderClients::from_config(&config, cache.clone()).map_err(BootstrapError::Providers)?;
    info!(
        event_name = "system.bootstrap.providers_ready",
        correlation_id = "bootstrap",
        zoho_crm = providers.crm.is_some(),
        zoho_inventory = providers.inventory.is_some(),
        wazzup = providers.messaging.is_some(),
        "provider clients initialized"
    );

    let debouncer =
        Arc::new(EventDebouncer::from_config(cache.clone(), scheduler.clone(), &config.resilience));

    Ok(Application { config, cache, scheduler, providers, debouncer })
}
