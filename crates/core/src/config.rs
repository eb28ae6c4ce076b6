use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub server: ServerConfig,
    pub zoho_crm: ZohoCrmConfig,
    pub zoho_inventory: ZohoInventoryConfig,
    pub wazzup: WazzupConfig,
    pub resilience: ResilienceConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String,
    pub key_prefix: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub worker_enabled: bool,
    pub worker_poll_interval_ms: u64,
}

/// Refresh-token credentials shared by every Zoho OAuth client.
#[derive(Clone, Debug)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
}

impl OAuthCredentials {
    fn empty() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new().into(),
            refresh_token: String::new().into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty()
            && !self.client_secret.expose_secret().trim().is_empty()
            && !self.refresh_token.expose_secret().trim().is_empty()
    }

    fn is_partial(&self) -> bool {
        let present = [
            !self.client_id.trim().is_empty(),
            !self.client_secret.expose_secret().trim().is_empty(),
            !self.refresh_token.expose_secret().trim().is_empty(),
        ];
        present.iter().any(|set| *set) && !present.iter().all(|set| *set)
    }
}

#[derive(Clone, Debug)]
pub struct ZohoCrmConfig {
    pub credentials: OAuthCredentials,
    pub api_url: String,
    pub accounts_url: String,
}

#[derive(Clone, Debug)]
pub struct ZohoInventoryConfig {
    pub credentials: OAuthCredentials,
    pub api_url: String,
    pub accounts_url: String,
    pub organization_id: String,
}

#[derive(Clone, Debug)]
pub struct WazzupConfig {
    pub api_key: SecretString,
    pub api_url: String,
    pub webhook_secret: Option<SecretString>,
    pub channel_id: Option<String>,
}

impl WazzupConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.expose_secret().trim().is_empty()
    }
}

/// Retry, lock and debounce tuning for the resilience layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResilienceConfig {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub lock_ttl_secs: u64,
    pub lock_poll_interval_ms: u64,
    pub lock_poll_attempts: u32,
    pub token_safety_margin_secs: u64,
    pub min_token_ttl_secs: u64,
    pub debounce_delay_secs: u64,
    pub request_timeout_secs: u64,
}

impl ResilienceConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_secs(self.debounce_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 2,
            lock_ttl_secs: 10,
            lock_poll_interval_ms: 500,
            lock_poll_attempts: 20,
            token_safety_margin_secs: 60,
            min_token_ttl_secs: 10,
            debounce_delay_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub redis_url: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub worker_enabled: Option<bool>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig {
                url: "redis://localhost:6379/0".to_string(),
                key_prefix: "treejar".to_string(),
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
                worker_enabled: true,
                worker_poll_interval_ms: 1_000,
            },
            zoho_crm: ZohoCrmConfig {
                credentials: OAuthCredentials::empty(),
                api_url: "https://www.zohoapis.eu/crm/v7".to_string(),
                accounts_url: "https://accounts.zoho.eu".to_string(),
            },
            zoho_inventory: ZohoInventoryConfig {
                credentials: OAuthCredentials::empty(),
                api_url: "https://www.zohoapis.eu/inventory/v1".to_string(),
                accounts_url: "https://accounts.zoho.eu".to_string(),
                organization_id: String::new(),
            },
            wazzup: WazzupConfig {
                api_key: String::new().into(),
                api_url: "https://api.wazzup24.com/v3".to_string(),
                webhook_secret: None,
                channel_id: None,
            },
            resilience: ResilienceConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

fn non_empty_secret(value: String) -> Option<SecretString> {
    (!value.trim().is_empty()).then(|| secret_value(value))
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("treejar.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(redis) = patch.redis {
            if let Some(url) = redis.url {
                self.redis.url = url;
            }
            if let Some(key_prefix) = redis.key_prefix {
                self.redis.key_prefix = key_prefix;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(worker_enabled) = server.worker_enabled {
                self.server.worker_enabled = worker_enabled;
            }
            if let Some(worker_poll_interval_ms) = server.worker_poll_interval_ms {
                self.server.worker_poll_interval_ms = worker_poll_interval_ms;
            }
        }

        if let Some(crm) = patch.zoho_crm {
            crm.credentials.apply_to(&mut self.zoho_crm.credentials);
            if let Some(api_url) = crm.api_url {
                self.zoho_crm.api_url = api_url;
            }
            if let Some(accounts_url) = crm.accounts_url {
                self.zoho_crm.accounts_url = accounts_url;
            }
        }

        if let Some(inventory) = patch.zoho_inventory {
            inventory.credentials.apply_to(&mut self.zoho_inventory.credentials);
            if let Some(api_url) = inventory.api_url {
                self.zoho_inventory.api_url = api_url;
            }
            if let Some(accounts_url) = inventory.accounts_url {
                self.zoho_inventory.accounts_url = accounts_url;
            }
            if let Some(organization_id) = inventory.organization_id {
                self.zoho_inventory.organization_id = organization_id;
            }
        }

        if let Some(wazzup) = patch.wazzup {
            if let Some(wazzup_api_key_value) = wazzup.api_key {
                self.wazzup.api_key = secret_value(wazzup_api_key_value);
            }
            if let Some(api_url) = wazzup.api_url {
                self.wazzup.api_url = api_url;
            }
            if let Some(webhook_secret) = wazzup.webhook_secret {
                self.wazzup.webhook_secret = non_empty_secret(webhook_secret);
            }
            if let Some(channel_id) = wazzup.channel_id {
                self.wazzup.channel_id = Some(channel_id).filter(|value| !value.trim().is_empty());
            }
        }

        if let Some(resilience) = patch.resilience {
            resilience.apply_to(&mut self.resilience);
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let redis_url = read_env("TREEJAR_REDIS_URL").or_else(|| read_env("REDIS_URL"));
        if let Some(value) = redis_url {
            self.redis.url = value;
        }
        if let Some(value) = read_env("TREEJAR_REDIS_KEY_PREFIX") {
            self.redis.key_prefix = value;
        }

        if let Some(value) = read_env("TREEJAR_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TREEJAR_SERVER_PORT") {
            self.server.port = parse_u16("TREEJAR_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TREEJAR_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TREEJAR_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("TREEJAR_SERVER_WORKER_ENABLED") {
            self.server.worker_enabled = parse_bool("TREEJAR_SERVER_WORKER_ENABLED", &value)?;
        }
        if let Some(value) = read_env("TREEJAR_SERVER_WORKER_POLL_INTERVAL_MS") {
            self.server.worker_poll_interval_ms =
                parse_u64("TREEJAR_SERVER_WORKER_POLL_INTERVAL_MS", &value)?;
        }

        apply_credential_env("TREEJAR_ZOHO_CRM", &mut self.zoho_crm.credentials);
        if let Some(value) = read_env("TREEJAR_ZOHO_CRM_API_URL") {
            self.zoho_crm.api_url = value;
        }
        if let Some(value) = read_env("TREEJAR_ZOHO_CRM_ACCOUNTS_URL") {
            self.zoho_crm.accounts_url = value;
        }

        apply_credential_env("TREEJAR_ZOHO_INVENTORY", &mut self.zoho_inventory.credentials);
        if let Some(value) = read_env("TREEJAR_ZOHO_INVENTORY_API_URL") {
            self.zoho_inventory.api_url = value;
        }
        if let Some(value) = read_env("TREEJAR_ZOHO_INVENTORY_ACCOUNTS_URL") {
            self.zoho_inventory.accounts_url = value;
        }
        if let Some(value) = read_env("TREEJAR_ZOHO_INVENTORY_ORGANIZATION_ID") {
            self.zoho_inventory.organization_id = value;
        }

        if let Some(value) = read_env("TREEJAR_WAZZUP_API_KEY") {
            self.wazzup.api_key = secret_value(value);
        }
        if let Some(value) = read_env("TREEJAR_WAZZUP_API_URL") {
            self.wazzup.api_url = value;
        }
        if let Some(value) = read_env("TREEJAR_WAZZUP_WEBHOOK_SECRET") {
            self.wazzup.webhook_secret = non_empty_secret(value);
        }
        if let Some(value) = read_env("TREEJAR_WAZZUP_CHANNEL_ID") {
            self.wazzup.channel_id = Some(value);
        }

        if let Some(value) = read_env("TREEJAR_RESILIENCE_MAX_ATTEMPTS") {
            self.resilience.max_attempts = parse_u32("TREEJAR_RESILIENCE_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("TREEJAR_RESILIENCE_BACKOFF_BASE_SECS") {
            self.resilience.backoff_base_secs =
                parse_u64("TREEJAR_RESILIENCE_BACKOFF_BASE_SECS", &value)?;
        }
        if let Some(value) = read_env("TREEJAR_RESILIENCE_DEBOUNCE_DELAY_SECS") {
            self.resilience.debounce_delay_secs =
                parse_u64("TREEJAR_RESILIENCE_DEBOUNCE_DELAY_SECS", &value)?;
        }
        if let Some(value) = read_env("TREEJAR_RESILIENCE_REQUEST_TIMEOUT_SECS") {
            self.resilience.request_timeout_secs =
                parse_u64("TREEJAR_RESILIENCE_REQUEST_TIMEOUT_SECS", &value)?;
        }

        let log_level = read_env("TREEJAR_LOGGING_LEVEL").or_else(|| read_env("TREEJAR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TREEJAR_LOGGING_FORMAT").or_else(|| read_env("TREEJAR_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(redis_url) = overrides.redis_url {
            self.redis.url = redis_url;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(worker_enabled) = overrides.worker_enabled {
            self.server.worker_enabled = worker_enabled;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_redis(&self.redis)?;
        validate_server(&self.server)?;
        validate_oauth_provider(
            "zoho_crm",
            &self.zoho_crm.credentials,
            &self.zoho_crm.api_url,
            &self.zoho_crm.accounts_url,
        )?;
        validate_oauth_provider(
            "zoho_inventory",
            &self.zoho_inventory.credentials,
            &self.zoho_inventory.api_url,
            &self.zoho_inventory.accounts_url,
        )?;
        if self.zoho_inventory.credentials.is_configured()
            && self.zoho_inventory.organization_id.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "zoho_inventory.organization_id is required when inventory credentials are set"
                    .to_string(),
            ));
        }
        validate_http_url("wazzup.api_url", &self.wazzup.api_url)?;
        validate_resilience(&self.resilience)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn apply_credential_env(prefix: &str, credentials: &mut OAuthCredentials) {
    if let Some(value) = read_env(&format!("{prefix}_CLIENT_ID")) {
        credentials.client_id = value;
    }
    if let Some(value) = read_env(&format!("{prefix}_CLIENT_SECRET")) {
        credentials.client_secret = secret_value(value);
    }
    if let Some(value) = read_env(&format!("{prefix}_REFRESH_TOKEN")) {
        credentials.refresh_token = secret_value(value);
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("treejar.toml"), PathBuf::from("config/treejar.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_redis(redis: &RedisConfig) -> Result<(), ConfigError> {
    let url = redis.url.trim();
    if !url.starts_with("redis://") && !url.starts_with("rediss://") {
        return Err(ConfigError::Validation(
            "redis.url must start with redis:// or rediss://".to_string(),
        ));
    }

    if redis.key_prefix.contains(char::is_whitespace) {
        return Err(ConfigError::Validation(
            "redis.key_prefix must not contain whitespace".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if server.worker_poll_interval_ms == 0 || server.worker_poll_interval_ms > 60_000 {
        return Err(ConfigError::Validation(
            "server.worker_poll_interval_ms must be in range 1..=60000".to_string(),
        ));
    }

    Ok(())
}

fn validate_oauth_provider(
    section: &str,
    credentials: &OAuthCredentials,
    api_url: &str,
    accounts_url: &str,
) -> Result<(), ConfigError> {
    if credentials.is_partial() {
        return Err(ConfigError::Validation(format!(
            "{section} credentials are incomplete: client_id, client_secret and refresh_token must be set together"
        )));
    }

    validate_http_url(&format!("{section}.api_url"), api_url)?;
    validate_http_url(&format!("{section}.accounts_url"), accounts_url)
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https://"
        )));
    }
    Ok(())
}

fn validate_resilience(resilience: &ResilienceConfig) -> Result<(), ConfigError> {
    if resilience.max_attempts == 0 || resilience.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "resilience.max_attempts must be in range 1..=10".to_string(),
        ));
    }

    if resilience.lock_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "resilience.lock_ttl_secs must be greater than zero".to_string(),
        ));
    }

    if resilience.lock_poll_interval_ms == 0 || resilience.lock_poll_attempts == 0 {
        return Err(ConfigError::Validation(
            "resilience.lock_poll_interval_ms and resilience.lock_poll_attempts must be greater than zero"
                .to_string(),
        ));
    }

    if resilience.min_token_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "resilience.min_token_ttl_secs must be greater than zero".to_string(),
        ));
    }

    if resilience.request_timeout_secs == 0 || resilience.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "resilience.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    redis: Option<RedisPatch>,
    server: Option<ServerPatch>,
    zoho_crm: Option<ZohoCrmPatch>,
    zoho_inventory: Option<ZohoInventoryPatch>,
    wazzup: Option<WazzupPatch>,
    resilience: Option<ResiliencePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct RedisPatch {
    url: Option<String>,
    key_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    worker_enabled: Option<bool>,
    worker_poll_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CredentialsPatch {
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
}

impl CredentialsPatch {
    fn apply_to(self, credentials: &mut OAuthCredentials) {
        if let Some(client_id) = self.client_id {
            credentials.client_id = client_id;
        }
        if let Some(client_secret_value) = self.client_secret {
            credentials.client_secret = secret_value(client_secret_value);
        }
        if let Some(refresh_token_value) = self.refresh_token {
            credentials.refresh_token = secret_value(refresh_token_value);
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ZohoCrmPatch {
    #[serde(flatten)]
    credentials: CredentialsPatch,
    api_url: Option<String>,
    accounts_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ZohoInventoryPatch {
    #[serde(flatten)]
    credentials: CredentialsPatch,
    api_url: Option<String>,
    accounts_url: Option<String>,
    organization_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WazzupPatch {
    api_key: Option<String>,
    api_url: Option<String>,
    webhook_secret: Option<String>,
    channel_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResiliencePatch {
    max_attempts: Option<u32>,
    backoff_base_secs: Option<u64>,
    lock_ttl_secs: Option<u64>,
    lock_poll_interval_ms: Option<u64>,
    lock_poll_attempts: Option<u32>,
    token_safety_margin_secs: Option<u64>,
    min_token_ttl_secs: Option<u64>,
    debounce_delay_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

impl ResiliencePatch {
    fn apply_to(self, resilience: &mut ResilienceConfig) {
        if let Some(value) = self.max_attempts {
            resilience.max_attempts = value;
        }
        if let Some(value) = self.backoff_base_secs {
            resilience.backoff_base_secs = value;
        }
        if let Some(value) = self.lock_ttl_secs {
            resilience.lock_ttl_secs = value;
        }
        if let Some(value) = self.lock_poll_interval_ms {
            resilience.lock_poll_interval_ms = value;
        }
        if let Some(value) = self.lock_poll_attempts {
            resilience.lock_poll_attempts = value;
        }
        if let Some(value) = self.token_safety_margin_secs {
            resilience.token_safety_margin_secs = value;
        }
        if let Some(value) = self.min_token_ttl_secs {
            resilience.min_token_ttl_secs = value;
        }
        if let Some(value) = self.debounce_delay_secs {
            resilience.debounce_delay_secs = value;
        }
        if let Some(value) = self.request_timeout_secs {
            resilience.request_timeout_secs = value;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_resilience_contract() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.resilience.max_attempts == 3, "three attempts by default")?;
        ensure(config.resilience.backoff_base_secs == 2, "backoff base is two seconds")?;
        ensure(config.resilience.lock_ttl_secs == 10, "lock ttl is ten seconds")?;
        ensure(config.resilience.lock_poll_interval_ms == 500, "lock poll every 500ms")?;
        ensure(config.resilience.lock_poll_attempts == 20, "twenty lock polls")?;
        ensure(config.resilience.debounce_delay_secs == 5, "debounce window is five seconds")?;
        ensure(config.redis.url == "redis://localhost:6379/0", "local redis by default")?;
        ensure(!config.zoho_crm.credentials.is_configured(), "crm unconfigured by default")?;
        ensure(config.wazzup.webhook_secret.is_none(), "webhook secret unset by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_ZOHO_CLIENT_SECRET", "secret-from-env");
        env::set_var("TEST_ZOHO_REFRESH_TOKEN", "refresh-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("treejar.toml");
            fs::write(
                &path,
                r#"
[zoho_crm]
client_id = "1000.client"
client_secret = "${TEST_ZOHO_CLIENT_SECRET}"
refresh_token = "${TEST_ZOHO_REFRESH_TOKEN}"

[resilience]
debounce_delay_secs = 8
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.zoho_crm.credentials.client_secret.expose_secret() == "secret-from-env",
                "client secret should be loaded from environment",
            )?;
            ensure(
                config.zoho_crm.credentials.refresh_token.expose_secret() == "refresh-from-env",
                "refresh token should be loaded from environment",
            )?;
            ensure(config.zoho_crm.credentials.is_configured(), "crm should be configured")?;
            ensure(config.resilience.debounce_delay_secs == 8, "file should tune debounce delay")?;
            Ok(())
        })();

        clear_vars(&["TEST_ZOHO_CLIENT_SECRET", "TEST_ZOHO_REFRESH_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TREEJAR_LOG_LEVEL", "warn");
        env::set_var("TREEJAR_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["TREEJAR_LOG_LEVEL", "TREEJAR_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TREEJAR_REDIS_URL", "redis://from-env:6379/1");
        env::set_var("TREEJAR_WAZZUP_API_KEY", "wazzup-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("treejar.toml");
            fs::write(
                &path,
                r#"
[redis]
url = "redis://from-file:6379/0"

[wazzup]
api_key = "wazzup-from-file"
webhook_secret = "hook-secret"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    redis_url: Some("redis://from-override:6379/2".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.redis.url == "redis://from-override:6379/2",
                "override redis url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.wazzup.api_key.expose_secret() == "wazzup-from-env",
                "env api key should win over file and defaults",
            )?;
            ensure(
                config
                    .wazzup
                    .webhook_secret
                    .as_ref()
                    .map(|secret| secret.expose_secret() == "hook-secret")
                    .unwrap_or(false),
                "file webhook secret should survive",
            )?;
            Ok(())
        })();

        clear_vars(&["TREEJAR_REDIS_URL", "TREEJAR_WAZZUP_API_KEY"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TREEJAR_REDIS_URL", "http://not-redis");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("redis.url")
            );
            ensure(has_message, "validation failure should mention redis.url")
        })();

        clear_vars(&["TREEJAR_REDIS_URL"]);
        result
    }

    #[test]
    fn partial_credentials_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TREEJAR_ZOHO_INVENTORY_CLIENT_ID", "1000.only-id");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("partial credentials should not validate".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::Validation(ref message) if message.contains("zoho_inventory")
                ),
                "validation failure should name the inventory section",
            )
        })();

        clear_vars(&["TREEJAR_ZOHO_INVENTORY_CLIENT_ID"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TREEJAR_ZOHO_CRM_CLIENT_ID", "1000.client");
        env::set_var("TREEJAR_ZOHO_CRM_CLIENT_SECRET", "crm-secret-value");
        env::set_var("TREEJAR_ZOHO_CRM_REFRESH_TOKEN", "crm-refresh-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("crm-secret-value"), "debug output should not contain secret")?;
            ensure(
                !debug.contains("crm-refresh-value"),
                "debug output should not contain refresh token",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "TREEJAR_ZOHO_CRM_CLIENT_ID",
            "TREEJAR_ZOHO_CRM_CLIENT_SECRET",
            "TREEJAR_ZOHO_CRM_REFRESH_TOKEN",
        ]);
        result
    }
}
