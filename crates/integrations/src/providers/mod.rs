use std::sync::Arc;

use treejar_cache::SharedCache;
use treejar_core::config::AppConfig;
use treejar_core::domain::token::ProviderId;

use crate::client::{Credentials, ResilientClient, RetryPolicy};
use crate::errors::{IntegrationError, TransportFailure};
use crate::oauth::OAuthRefreshSource;
use crate::token_broker::{TokenBroker, TokenPolicy};
use crate::transport::HttpTransport;

pub mod wazzup;
pub mod zoho_crm;
pub mod zoho_inventory;

pub use wazzup::{WazzupClient, WazzupWebhook};
pub use zoho_crm::ZohoCrmClient;
pub use zoho_inventory::ZohoInventoryClient;

pub const ZOHO_CRM: &str = "zoho_crm";
pub const ZOHO_INVENTORY: &str = "zoho_inventory";
pub const WAZZUP: &str = "wazzup";

/// Long-lived provider clients built once at process start. Providers without
/// credentials are left out.
pub struct ProviderClients {
    pub broker: Arc<TokenBroker>,
    pub crm: Option<ZohoCrmClient>,
    pub inventory: Option<ZohoInventoryClient>,
    pub messaging: Option<WazzupClient>,
}

impl ProviderClients {
    pub fn from_config(
        config: &AppConfig,
        cache: Arc<dyn SharedCache>,
    ) -> Result<Self, IntegrationError> {
        let http = reqwest::Client::builder().build().map_err(|error| {
            IntegrationError::Transport {
                provider: "http".to_string(),
                attempts: 0,
                source: TransportFailure::Network(error.to_string()),
            }
        })?;
        let timeout = config.resilience.request_timeout();
        let retry = RetryPolicy::from(&config.resilience);

        let crm_id = ProviderId::new(ZOHO_CRM);
        let inventory_id = ProviderId::new(ZOHO_INVENTORY);

        let mut broker = TokenBroker::new(cache, TokenPolicy::from(&config.resilience));
        if config.zoho_crm.credentials.is_configured() {
            broker = broker.register(
                crm_id.clone(),
                Arc::new(OAuthRefreshSource::new(
                    http.clone(),
                    &config.zoho_crm.accounts_url,
                    &config.zoho_crm.credentials,
                )),
            );
        }
        if config.zoho_inventory.credentials.is_configured() {
            broker = broker.register(
                inventory_id.clone(),
                Arc::new(OAuthRefreshSource::new(
                    http.clone(),
                    &config.zoho_inventory.accounts_url,
                    &config.zoho_inventory.credentials,
                )),
            );
        }
        let broker = Arc::new(broker);

        let crm = config.zoho_crm.credentials.is_configured().then(|| {
            ZohoCrmClient::new(
                ResilientClient::new(
                    crm_id,
                    Credentials::Brokered { broker: broker.clone() },
                    Arc::new(HttpTransport::new(http.clone(), &config.zoho_crm.api_url, timeout)),
                    retry.clone(),
                )
                .with_options(ZohoCrmClient::options()),
            )
        });

        let inventory = config.zoho_inventory.credentials.is_configured().then(|| {
            ZohoInventoryClient::new(
                ResilientClient::new(
                    inventory_id,
                    Credentials::Brokered { broker: broker.clone() },
                    Arc::new(HttpTransport::new(
                        http.clone(),
                        &config.zoho_inventory.api_url,
                        timeout,
                    )),
                    retry.clone(),
                )
                .with_options(ZohoInventoryClient::options(&config.zoho_inventory.organization_id)),
            )
        });

        let messaging = config.wazzup.is_configured().then(|| {
            WazzupClient::new(
                ResilientClient::new(
                    ProviderId::new(WAZZUP),
                    Credentials::Static(config.wazzup.api_key.clone()),
                    Arc::new(HttpTransport::new(http.clone(), &config.wazzup.api_url, timeout)),
                    retry.clone(),
                ),
                config.wazzup.channel_id.clone(),
            )
        });

        Ok(Self { broker, crm, inventory, messaging })
    }
}

/// First element of a `{"data": [...]}` envelope.
pub(crate) fn first_data_record(body: &serde_json::Value) -> Option<serde_json::Value> {
    body.get("data").and_then(|data| data.as_array()).and_then(|records| records.first()).cloned()
}
