use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::{bounded_delta, MAX_LIFETIME_SECS};
use crate::error::CrmAuthError;
use crate::leads::CrmLead;
use crate::store::CrmCredential;

/// External CRM systems MarkMail can connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Salesforce,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Salesforce => "salesforce",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = CrmAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "salesforce" => Ok(Provider::Salesforce),
            other => Err(CrmAuthError::ProviderNotFound(other.to_string())),
        }
    }
}

/// Tokens returned from a CRM after code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    /// Org-specific API base URL, when the token endpoint reports one.
    pub instance_url: Option<String>,
}

impl TokenSet {
    /// Absolute expiry, falling back to `default_lifetime` when the CRM
    /// reports no `expires_in`. Lifetimes are capped at [`MAX_LIFETIME_SECS`].
    pub fn expires_at(&self, now: DateTime<Utc>, default_lifetime: Duration) -> DateTime<Utc> {
        let lifetime = match self.expires_in {
            Some(secs) => Duration::from_secs(secs),
            None => default_lifetime,
        };
        now + bounded_delta(lifetime)
    }
}

/// Trait that every CRM integration implements.
///
/// Covers the OAuth endpoints (authorize, token, revoke, userinfo) and the
/// one CRM write MarkMail performs with the resulting credential.
#[async_trait]
pub trait CrmProvider: Send + Sync {
    fn kind(&self) -> Provider;

    /// Human-readable display name (e.g. "Salesforce").
    fn display_name(&self) -> &str;

    /// Build the authorization URL the user is sent to.
    fn auth_url(&self, state: &str) -> String;

    /// Exchange an authorization code for tokens. Never retried: codes are single-use.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, CrmAuthError>;

    /// Refresh an access token using a refresh token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, CrmAuthError>;

    /// Resolve the org API base URL for an access token when the token
    /// response did not carry one.
    async fn resolve_instance_url(&self, access_token: &str) -> Result<String, CrmAuthError>;

    /// Revoke an access or refresh token. Not all CRMs support this.
    async fn revoke(&self, _token: &str) -> Result<(), CrmAuthError> {
        Ok(())
    }

    /// Create a lead in the connected org. Returns the CRM record id.
    async fn create_lead(
        &self,
        credential: &CrmCredential,
        lead: &CrmLead,
    ) -> Result<String, CrmAuthError>;
}
