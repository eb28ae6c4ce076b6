use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use toml::Value;
use treejar_core::config::{AppConfig, LoadOptions};

struct ConfigLine {
    key: &'static str,
    value: String,
    env_key: &'static str,
}

impl ConfigLine {
    fn new(key: &'static str, value: impl Into<String>, env_key: &'static str) -> Self {
        Self { key, value: value.into(), env_key }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for line in effective_lines(&config) {
        let source = field_source(
            line.key,
            line.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(line.key, &line.value, source));
    }

    lines.join("\n")
}

fn effective_lines(config: &AppConfig) -> Vec<ConfigLine> {
    let crm = &config.zoho_crm;
    let inventory = &config.zoho_inventory;
    let wazzup = &config.wazzup;
    let resilience = &config.resilience;

    vec![
        ConfigLine::new("redis.url", redact_url(&config.redis.url), "TREEJAR_REDIS_URL"),
        ConfigLine::new("redis.key_prefix", &config.redis.key_prefix, "TREEJAR_REDIS_KEY_PREFIX"),
        ConfigLine::new(
            "server.bind_address",
            &config.server.bind_address,
            "TREEJAR_SERVER_BIND_ADDRESS",
        ),
        ConfigLine::new("server.port", config.server.port.to_string(), "TREEJAR_SERVER_PORT"),
        ConfigLine::new(
            "server.worker_enabled",
            config.server.worker_enabled.to_string(),
            "TREEJAR_SERVER_WORKER_ENABLED",
        ),
        ConfigLine::new(
            "server.worker_poll_interval_ms",
            config.server.worker_poll_interval_ms.to_string(),
            "TREEJAR_SERVER_WORKER_POLL_INTERVAL_MS",
        ),
        ConfigLine::new(
            "zoho_crm.client_id",
            unset_if_empty(&crm.credentials.client_id),
            "TREEJAR_ZOHO_CRM_CLIENT_ID",
        ),
        ConfigLine::new(
            "zoho_crm.client_secret",
            redact_secret(&crm.credentials.client_secret),
            "TREEJAR_ZOHO_CRM_CLIENT_SECRET",
        ),
        ConfigLine::new(
            "zoho_crm.refresh_token",
            redact_secret(&crm.credentials.refresh_token),
            "TREEJAR_ZOHO_CRM_REFRESH_TOKEN",
        ),
        ConfigLine::new("zoho_crm.api_url", &crm.api_url, "TREEJAR_ZOHO_CRM_API_URL"),
        ConfigLine::new("zoho_crm.accounts_url", &crm.accounts_url, "TREEJAR_ZOHO_CRM_ACCOUNTS_URL"),
        ConfigLine::new(
            "zoho_inventory.client_id",
            unset_if_empty(&inventory.credentials.client_id),
            "TREEJAR_ZOHO_INVENTORY_CLIENT_ID",
        ),
        ConfigLine::new(
            "zoho_inventory.client_secret",
            redact_secret(&inventory.credentials.client_secret),
            "TREEJAR_ZOHO_INVENTORY_CLIENT_SECRET",
        ),
        ConfigLine::new(
            "zoho_inventory.refresh_token",
            redact_secret(&inventory.credentials.refresh_token),
            "TREEJAR_ZOHO_INVENTORY_REFRESH_TOKEN",
        ),
        ConfigLine::new(
            "zoho_inventory.organization_id",
            unset_if_empty(&inventory.organization_id),
            "TREEJAR_ZOHO_INVENTORY_ORGANIZATION_ID",
        ),
        ConfigLine::new("zoho_inventory.api_url", &inventory.api_url, "TREEJAR_ZOHO_INVENTORY_API_URL"),
        ConfigLine::new("wazzup.api_key", redact_secret(&wazzup.api_key), "TREEJAR_WAZZUP_API_KEY"),
        ConfigLine::new("wazzup.api_url", &wazzup.api_url, "TREEJAR_WAZZUP_API_URL"),
        ConfigLine::new(
            "wazzup.webhook_secret",
            wazzup.webhook_secret.as_ref().map(redact_secret).unwrap_or_else(|| "<unset>".to_string()),
            "TREEJAR_WAZZUP_WEBHOOK_SECRET",
        ),
        ConfigLine::new(
            "wazzup.channel_id",
            wazzup.channel_id.as_deref().unwrap_or("<unset>"),
            "TREEJAR_WAZZUP_CHANNEL_ID",
        ),
        ConfigLine::new(
            "resilience.max_attempts",
            resilience.max_attempts.to_string(),
            "TREEJAR_RESILIENCE_MAX_ATTEMPTS",
        ),
        ConfigLine::new(
            "resilience.backoff_base_secs",
            resilience.backoff_base_secs.to_string(),
            "TREEJAR_RESILIENCE_BACKOFF_BASE_SECS",
        ),
        ConfigLine::new(
            "resilience.debounce_delay_secs",
            resilience.debounce_delay_secs.to_string(),
            "TREEJAR_RESILIENCE_DEBOUNCE_DELAY_SECS",
        ),
        ConfigLine::new(
            "resilience.request_timeout_secs",
            resilience.request_timeout_secs.to_string(),
            "TREEJAR_RESILIENCE_REQUEST_TIMEOUT_SECS",
        ),
        ConfigLine::new("logging.level", &config.logging.level, "TREEJAR_LOGGING_LEVEL"),
        ConfigLine::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            "TREEJAR_LOGGING_FORMAT",
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("treejar.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/treejar.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn unset_if_empty(value: &str) -> String {
    if value.trim().is_empty() {
        "<unset>".to_string()
    } else {
        value.to_string()
    }
}

/// Zoho secrets look like `1000.<hex>`; keep only the numeric prefix.
fn redact_secret(secret: &SecretString) -> String {
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('.') {
        if !prefix.is_empty() && prefix.chars().all(|ch| ch.is_ascii_digit()) {
            return format!("{prefix}.***");
        }
    }

    "<redacted>".to_string()
}

fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((_, host)) => format!("{scheme}://***@{host}"),
        None => url.to_string(),
    }
}
