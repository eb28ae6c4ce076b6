use std::sync::Arc;

use clap::ValueEnum;
use serde_json::json;
use treejar_cache::{RedisSharedCache, SharedCache};
use treejar_core::config::{AppConfig, LoadOptions};
use treejar_integrations::providers::ProviderClients;
use treejar_integrations::IntegrationError;

use crate::commands::{exit, CommandResult};

const COMMAND: &str = "verify";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum VerifyTarget {
    Crm,
    Inventory,
    Wazzup,
}

impl VerifyTarget {
    fn provider_name(self) -> &'static str {
        match self {
            Self::Crm => "zoho_crm",
            Self::Inventory => "zoho_inventory",
            Self::Wazzup => "wazzup",
        }
    }

    fn is_configured(self, config: &AppConfig) -> bool {
        match self {
            Self::Crm => config.zoho_crm.credentials.is_configured(),
            Self::Inventory => config.zoho_inventory.credentials.is_configured(),
            Self::Wazzup => config.wazzup.is_configured(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct VerifyArgs {
    pub target: VerifyTarget,
    pub phone: Option<String>,
    pub chat_id: Option<String>,
    pub text: String,
}

pub fn run(args: VerifyArgs) -> CommandResult {
    let provider = args.target.provider_name();
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                None,
                "config_validation",
                error.to_string(),
                exit::INVALID_INPUT,
            )
        }
    };

    if !args.target.is_configured(&config) {
        return not_configured(provider, format!("{provider} credentials are not configured"));
    }
    if let Err(message) = required_inputs(&args) {
        return CommandResult::failure(
            COMMAND,
            Some(provider),
            "invalid_arguments",
            message,
            exit::INVALID_INPUT,
        );
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                Some(provider),
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                exit::CHECKS_FAILED,
            )
        }
    };

    runtime.block_on(verify(config, args))
}

fn required_inputs(args: &VerifyArgs) -> Result<(), String> {
    match args.target {
        VerifyTarget::Crm if args.phone.is_none() => Err("verify crm requires --phone".to_string()),
        VerifyTarget::Wazzup if args.chat_id.is_none() => {
            Err("verify wazzup requires --chat-id".to_string())
        }
        _ => Ok(()),
    }
}

async fn verify(config: AppConfig, args: VerifyArgs) -> CommandResult {
    let provider = args.target.provider_name();
    let cache: Arc<dyn SharedCache> =
        match RedisSharedCache::connect(&config.redis.url, config.redis.key_prefix.clone()).await {
            Ok(cache) => Arc::new(cache),
            Err(error) => {
                return CommandResult::failure(
                    COMMAND,
                    Some(provider),
                    "redis_unavailable",
                    format!("failed to connect to redis: {error}"),
                    exit::REDIS_UNAVAILABLE,
                )
            }
        };

    let clients = match ProviderClients::from_config(&config, cache) {
        Ok(clients) => clients,
        Err(error) => return call_failure(provider, error),
    };

    let outcome = match args.target {
        VerifyTarget::Crm => match (&clients.crm, args.phone.as_deref()) {
            (Some(crm), Some(phone)) => crm
                .find_contact_by_phone(phone)
                .await
                .map(|contact| json!({ "phone": phone, "contact": contact })),
            _ => return client_missing(provider),
        },
        VerifyTarget::Inventory => match &clients.inventory {
            Some(inventory) => {
                inventory.get_items(1, 5).await.map(|items| json!({ "page": 1, "items": items }))
            }
            None => return client_missing(provider),
        },
        VerifyTarget::Wazzup => match (&clients.messaging, args.chat_id.as_deref()) {
            (Some(messaging), Some(chat_id)) => messaging
                .send_text(chat_id, &args.text)
                .await
                .map(|message_id| json!({ "chat_id": chat_id, "message_id": message_id })),
            _ => return client_missing(provider),
        },
    };

    match outcome {
        Ok(result) => {
            CommandResult::success(COMMAND, provider, format!("{provider} call succeeded"), result)
        }
        Err(error) => call_failure(provider, error),
    }
}

fn not_configured(provider: &str, message: String) -> CommandResult {
    CommandResult::failure(
        COMMAND,
        Some(provider),
        "provider_not_configured",
        message,
        exit::PROVIDER_NOT_CONFIGURED,
    )
}

fn client_missing(provider: &str) -> CommandResult {
    not_configured(provider, format!("{provider} client was not built"))
}

fn call_failure(provider: &str, error: IntegrationError) -> CommandResult {
    CommandResult::failure(
        COMMAND,
        Some(provider),
        error.error_class(),
        error.to_string(),
        exit::PROVIDER_CALL_FAILED,
    )
}
