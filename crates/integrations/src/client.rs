use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use treejar_core::config::ResilienceConfig;
use treejar_core::domain::token::ProviderId;

use crate::errors::{AuthError, IntegrationError, TransportFailure};
use crate::sleep::{Sleeper, TokioSleeper};
use crate::token_broker::TokenBroker;
use crate::transport::{HttpMethod, OutboundRequest, ProviderResponse, ProviderTransport};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for RetryPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self { max_attempts: config.max_attempts.max(1), backoff_base_secs: config.backoff_base_secs }
    }
}

impl RetryPolicy {
    /// Delay after a transient failure on `attempt` (1-based): `base^attempt` seconds.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        Duration::from_secs(self.backoff_base_secs.saturating_pow(exponent))
    }
}

/// Bookkeeping for one call's retry loop. Never outlives `execute`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub last_error_class: Option<&'static str>,
}

impl RetryAttempt {
    fn has_remaining(&self) -> bool {
        self.attempt_number < self.max_attempts
    }
}

pub enum Credentials {
    /// OAuth access token obtained through the shared broker.
    Brokered { broker: Arc<TokenBroker> },
    /// Long-lived API key; nothing to refresh or invalidate.
    Static(SecretString),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    /// Scheme placed before the token in the `Authorization` header.
    pub auth_scheme: String,
    /// Query parameters added to every request, overriding caller values with the same name.
    pub default_query: Vec<(String, String)>,
    /// Non-2xx statuses the provider uses to mean "no results".
    pub empty_result_statuses: Vec<u16>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auth_scheme: "Bearer".to_string(),
            default_query: Vec::new(),
            empty_result_statuses: Vec::new(),
        }
    }
}

enum Classified {
    Done(ProviderResponse),
    Unauthorized,
    RateLimited,
    Transport(TransportFailure),
    Rejected(ProviderResponse),
}

/// Executes one outbound provider call with token injection and classified retries.
pub struct ResilientClient {
    provider: ProviderId,
    credentials: Credentials,
    transport: Arc<dyn ProviderTransport>,
    retry: RetryPolicy,
    options: ClientOptions,
    sleeper: Arc<dyn Sleeper>,
}

impl ResilientClient {
    pub fn new(
        provider: ProviderId,
        credentials: Credentials,
        transport: Arc<dyn ProviderTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            credentials,
            transport,
            retry,
            options: ClientOptions::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub async fn get(
        &self,
        path: &str,
        params: Vec<(String, String)>,
    ) -> Result<ProviderResponse, IntegrationError> {
        self.execute(HttpMethod::Get, path, params, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<ProviderResponse, IntegrationError> {
        self.execute(HttpMethod::Post, path, Vec::new(), Some(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<ProviderResponse, IntegrationError> {
        self.execute(HttpMethod::Put, path, Vec::new(), Some(body)).await
    }

    pub async fn execute(
        &self,
        method: HttpMethod,
        path: &str,
        params: Vec<(String, String)>,
        body: Option<Value>,
    ) -> Result<ProviderResponse, IntegrationError> {
        let query = self.merged_query(params);
        let mut attempt = RetryAttempt {
            attempt_number: 0,
            max_attempts: self.retry.max_attempts.max(1),
            last_error_class: None,
        };

        loop {
            attempt.attempt_number += 1;
            let authorization = self.authorization().await?;
            let request = OutboundRequest {
                method,
                path: path.to_string(),
                query: query.clone(),
                body: body.clone(),
                authorization: Some(authorization),
            };

            match self.classify(self.transport.send(request).await) {
                Classified::Done(response) => {
                    debug!(
                        event_name = "integration.request.completed",
                        provider = %self.provider,
                        method = method.as_str(),
                        path,
                        status = response.status,
                        attempt = attempt.attempt_number,
                        "provider request completed"
                    );
                    return Ok(response);
                }
                Classified::Rejected(response) => {
                    warn!(
                        event_name = "integration.request.rejected",
                        provider = %self.provider,
                        method = method.as_str(),
                        path,
                        status = response.status,
                        error_class = "request",
                        "provider rejected request"
                    );
                    return Err(IntegrationError::Request {
                        provider: self.provider.to_string(),
                        status: response.status,
                        body: body_excerpt(&response.body),
                    });
                }
                Classified::Unauthorized => {
                    attempt.last_error_class = Some("auth");
                    let Credentials::Brokered { broker } = &self.credentials else {
                        return Err(AuthError::Rejected {
                            provider: self.provider.to_string(),
                            attempts: attempt.attempt_number,
                        }
                        .into());
                    };
                    broker.invalidate(&self.provider).await?;
                    if !attempt.has_remaining() {
                        return Err(AuthError::Rejected {
                            provider: self.provider.to_string(),
                            attempts: attempt.attempt_number,
                        }
                        .into());
                    }
                    self.log_retry(&attempt, method, path, Duration::ZERO);
                }
                Classified::RateLimited => {
                    attempt.last_error_class = Some("rate_limited");
                    if !attempt.has_remaining() {
                        return Err(IntegrationError::RateLimited {
                            provider: self.provider.to_string(),
                            attempts: attempt.attempt_number,
                        });
                    }
                    self.back_off(&attempt, method, path).await;
                }
                Classified::Transport(failure) => {
                    attempt.last_error_class = Some("transport");
                    if !attempt.has_remaining() {
                        return Err(IntegrationError::Transport {
                            provider: self.provider.to_string(),
                            attempts: attempt.attempt_number,
                            source: failure,
                        });
                    }
                    debug!(
                        provider = %self.provider,
                        error = %failure,
                        "transport failure before retry"
                    );
                    self.back_off(&attempt, method, path).await;
                }
            }
        }
    }

    async fn authorization(&self) -> Result<String, IntegrationError> {
        let token = match &self.credentials {
            Credentials::Brokered { broker } => broker.get_token(&self.provider).await?.token_value,
            Credentials::Static(secret) => secret.expose_secret().to_string(),
        };
        Ok(format!("{} {}", self.options.auth_scheme, token))
    }

    fn classify(&self, outcome: Result<ProviderResponse, TransportFailure>) -> Classified {
        match outcome {
            Err(failure) => Classified::Transport(failure),
            Ok(response) if response.status == 401 => Classified::Unauthorized,
            Ok(response) if response.status == 429 => Classified::RateLimited,
            Ok(response)
                if response.is_success()
                    || self.options.empty_result_statuses.contains(&response.status) =>
            {
                Classified::Done(response)
            }
            Ok(response) => Classified::Rejected(response),
        }
    }

    fn merged_query(&self, params: Vec<(String, String)>) -> Vec<(String, String)> {
        let mut query: Vec<(String, String)> = params
            .into_iter()
            .filter(|(name, _)| !self.options.default_query.iter().any(|(fixed, _)| fixed == name))
            .collect();
        query.extend(self.options.default_query.iter().cloned());
        query
    }

    async fn back_off(&self, attempt: &RetryAttempt, method: HttpMethod, path: &str) {
        let delay = self.retry.backoff(attempt.attempt_number);
        self.log_retry(attempt, method, path, delay);
        self.sleeper.sleep(delay).await;
    }

    fn log_retry(&self, attempt: &RetryAttempt, method: HttpMethod, path: &str, delay: Duration) {
        warn!(
            event_name = "integration.request.retry",
            provider = %self.provider,
            method = method.as_str(),
            path,
            attempt = attempt.attempt_number,
            max_attempts = attempt.max_attempts,
            error_class = attempt.last_error_class.unwrap_or("unknown"),
            delay_secs = delay.as_secs(),
            "retrying provider request"
        );
    }
}

fn body_excerpt(body: &Value) -> String {
    let text = match body {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    text.chars().take(512).collect()
}
