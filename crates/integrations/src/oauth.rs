use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use treejar_core::config::OAuthCredentials;
use treejar_core::domain::token::{ProviderId, TokenGrant};

use crate::errors::AuthError;
use crate::transport::classify_reqwest_error;

const REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// Provider endpoint that exchanges stored credentials for a fresh access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn refresh(&self, provider: &ProviderId) -> Result<TokenGrant, AuthError>;
}

/// `grant_type=refresh_token` exchange against `<accounts_url>/oauth/v2/token`.
pub struct OAuthRefreshSource {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    refresh_token: SecretString,
}

impl OAuthRefreshSource {
    pub fn new(http: reqwest::Client, accounts_url: &str, credentials: &OAuthCredentials) -> Self {
        Self {
            http,
            token_url: format!("{}/oauth/v2/token", accounts_url.trim_end_matches('/')),
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            refresh_token: credentials.refresh_token.clone(),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

#[async_trait]
impl TokenSource for OAuthRefreshSource {
    async fn refresh(&self, provider: &ProviderId) -> Result<TokenGrant, AuthError> {
        let form = [
            ("refresh_token", self.refresh_token.expose_secret()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .timeout(REFRESH_TIMEOUT)
            .send()
            .await
            .map_err(|error| AuthError::RefreshFailed {
                provider: provider.to_string(),
                message: classify_reqwest_error(error).to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::RefreshFailed {
                provider: provider.to_string(),
                message: format!("token endpoint returned status {}", status.as_u16()),
            });
        }

        response.json::<TokenGrant>().await.map_err(|error| AuthError::MalformedGrant {
            provider: provider.to_string(),
            message: error.to_string(),
        })
    }
}
