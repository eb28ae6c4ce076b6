use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shared-cache key holding the provider's current access token.
    pub fn token_key(&self) -> String {
        format!("{}:access_token", self.0)
    }

    /// Shared-cache key guarding the provider's token refresh.
    pub fn lock_key(&self) -> String {
        format!("{}:lock", self.0)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access token as stored in the shared cache, visible to every process.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub provider_id: ProviderId,
    pub token_value: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token_value.is_empty() && now < self.expires_at
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("provider_id", &self.provider_id)
            .field("token_value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Advisory refresh marker. Only the process that created it may refresh the token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshLock {
    pub provider_id: ProviderId,
    pub holder_token: String,
}

impl RefreshLock {
    pub fn new(provider_id: ProviderId, holder_token: impl Into<String>) -> Self {
        Self { provider_id, holder_token: holder_token.into() }
    }

    /// Cache key the marker lives under; its value is `holder_token`.
    pub fn key(&self) -> String {
        self.provider_id.lock_key()
    }
}

/// Body returned by an OAuth refresh endpoint.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{CachedToken, ProviderId, RefreshLock, TokenGrant};

    #[test]
    fn provider_keys_are_scoped_by_provider() {
        let provider = ProviderId::new("zoho_crm");

        assert_eq!(provider.token_key(), "zoho_crm:access_token");
        assert_eq!(provider.lock_key(), "zoho_crm:lock");
    }

    #[test]
    fn cached_token_expires_at_its_deadline() {
        let now = Utc::now();
        let token = CachedToken {
            provider_id: ProviderId::new("zoho_crm"),
            token_value: "abc".to_owned(),
            expires_at: now + Duration::seconds(30),
        };

        assert!(token.is_valid_at(now));
        assert!(!token.is_valid_at(now + Duration::seconds(30)));
    }

    #[test]
    fn debug_output_never_contains_token_value() {
        let token = CachedToken {
            provider_id: ProviderId::new("zoho_crm"),
            token_value: "super-secret-token".to_owned(),
            expires_at: Utc::now(),
        };
        let grant: TokenGrant =
            serde_json::from_str(r#"{"access_token":"grant-secret","expires_in":3600}"#)
                .expect("grant should decode");

        assert!(!format!("{token:?}").contains("super-secret-token"));
        assert!(!format!("{grant:?}").contains("grant-secret"));
        assert_eq!(grant.expires_in, Some(3600));
    }

    #[test]
    fn grant_without_access_token_decodes_as_empty() {
        let grant: TokenGrant =
            serde_json::from_str(r#"{"error":"invalid_code"}"#).expect("grant should decode");

        assert!(grant.access_token.is_empty());
        assert_eq!(grant.expires_in, None);
    }

    #[test]
    fn refresh_lock_lives_under_provider_lock_key() {
        let lock = RefreshLock::new(ProviderId::new("zoho_inventory"), "holder-1");

        assert_eq!(lock.key(), "zoho_inventory:lock");
        assert_eq!(lock.holder_token, "holder-1");
    }
}
