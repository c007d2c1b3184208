//! Credential storage for CRM connections.
//!
//! One row per (user_id, provider) in `crm_integrations`. The PostgreSQL
//! store is used in deployments; the in-memory store backs tests and local
//! runs without `DATABASE_URL`.

pub mod db;
pub mod memory;

pub use db::PgStore;
pub use memory::{MemoryCredentialStore, MemoryStateStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::error::CrmAuthError;
use crate::providers::Provider;

/// OAuth credential linking a MarkMail user to a CRM org.
#[derive(Clone, PartialEq)]
pub struct CrmCredential {
    pub user_id: String,
    pub provider: Provider,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub instance_url: String,
    pub token_type: String,
    pub scopes: String,
    pub expires_at: DateTime<Utc>,
    /// Set by the store on every write.
    pub updated_at: DateTime<Utc>,
}

impl CrmCredential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl fmt::Debug for CrmCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrmCredential")
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("access_token", &mask(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(mask))
            .field("instance_url", &self.instance_url)
            .field("token_type", &self.token_type)
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// First four characters followed by an ellipsis.
pub fn mask(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{prefix}…")
}

/// Audit log entry for credential lifecycle events.
#[derive(Debug, Clone, Serialize)]
pub struct AuthEvent {
    pub user_id: String,
    pub provider: Provider,
    pub event_type: &'static str,
    pub metadata: serde_json::Value,
}

impl AuthEvent {
    pub const CONNECTED: &'static str = "crm.connected";
    pub const REFRESHED: &'static str = "crm.refreshed";
    pub const REFRESH_FAILED: &'static str = "crm.refresh_failed";
    pub const REVOKED: &'static str = "crm.revoked";

    pub fn new(user_id: &str, provider: Provider, event_type: &'static str) -> Self {
        Self {
            user_id: user_id.to_string(),
            provider,
            event_type,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Persistent store of CRM credentials, one per (user, provider).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<CrmCredential>, CrmAuthError>;

    /// Insert or replace the credential for (user_id, provider) in one atomic
    /// write. A `None` refresh token keeps the previously stored one.
    /// Returns the row as stored.
    async fn upsert(&self, credential: &CrmCredential) -> Result<CrmCredential, CrmAuthError>;

    /// Remove the credential. Returns whether a row existed.
    async fn delete(&self, user_id: &str, provider: Provider) -> Result<bool, CrmAuthError>;

    /// Append an audit event.
    async fn log_event(&self, event: &AuthEvent) -> Result<(), CrmAuthError>;
}
