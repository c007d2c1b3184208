use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::lead::CrmLead;
use crate::config::bounded_delta;
use crate::error::CrmAuthError;
use crate::providers::{Provider, ProviderRegistry};
use crate::store::{AuthEvent, CredentialStore, CrmCredential};

#[derive(Debug, Clone, Serialize)]
pub struct LeadCreated {
    pub id: String,
}

/// Writes leads into a user's connected CRM, refreshing the access token
/// first when it is about to expire.
pub struct LeadSyncClient {
    store: Arc<dyn CredentialStore>,
    providers: Arc<ProviderRegistry>,
    refresh_skew: chrono::Duration,
    default_token_lifetime: Duration,
}

impl LeadSyncClient {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        providers: Arc<ProviderRegistry>,
        refresh_skew: Duration,
        default_token_lifetime: Duration,
    ) -> Self {
        Self {
            store,
            providers,
            refresh_skew: bounded_delta(refresh_skew),
            default_token_lifetime,
        }
    }

    /// The stored credential, refreshed if it expires within the skew window.
    pub async fn usable_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<CrmCredential, CrmAuthError> {
        let credential = self
            .store
            .get(user_id, provider)
            .await?
            .ok_or(CrmAuthError::NotAuthenticated)?;

        let now = Utc::now();
        if credential.expires_at > now + self.refresh_skew {
            return Ok(credential);
        }

        let refresh_token = match credential.refresh_token.as_deref() {
            Some(rt) => rt,
            None if credential.is_expired_at(now) => return Err(CrmAuthError::CredentialExpired),
            // Still valid for a moment and nothing to refresh with.
            None => return Ok(credential),
        };

        let crm = self.providers.get(provider)?;
        let tokens = match crm.refresh_token(refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("{provider} token refresh failed for user {user_id}: {e}");
                let event = AuthEvent::new(user_id, provider, AuthEvent::REFRESH_FAILED)
                    .with_metadata(json!({ "error": e.to_string() }));
                if let Err(log_err) = self.store.log_event(&event).await {
                    warn!("Failed to record refresh failure: {log_err}");
                }
                return Err(match e {
                    CrmAuthError::RefreshFailed(_) => e,
                    other => CrmAuthError::RefreshFailed(other.to_string()),
                });
            }
        };

        let now = Utc::now();
        let refreshed = CrmCredential {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            instance_url: tokens
                .instance_url
                .clone()
                .unwrap_or_else(|| credential.instance_url.clone()),
            token_type: tokens.token_type.clone(),
            scopes: tokens.scope.clone().unwrap_or_else(|| credential.scopes.clone()),
            expires_at: tokens.expires_at(now, self.default_token_lifetime),
            updated_at: now,
            ..credential
        };
        let stored = self.store.upsert(&refreshed).await?;

        let event = AuthEvent::new(user_id, provider, AuthEvent::REFRESHED)
            .with_metadata(json!({ "expires_at": stored.expires_at }));
        if let Err(e) = self.store.log_event(&event).await {
            warn!("Failed to record refresh event: {e}");
        }

        info!("Refreshed {provider} token for user {user_id}");
        Ok(stored)
    }

    pub async fn create_lead(
        &self,
        user_id: &str,
        provider: Provider,
        lead: &CrmLead,
    ) -> Result<LeadCreated, CrmAuthError> {
        let credential = self.usable_credential(user_id, provider).await?;
        let crm = self.providers.get(provider)?;

        let id = crm.create_lead(&credential, lead).await?;
        info!("Created {provider} lead {id} for user {user_id}");
        Ok(LeadCreated { id })
    }
}
