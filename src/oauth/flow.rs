//! Authorization-code flow: init → CRM consent → callback → token exchange → persistence.
//!
//! Per (user, provider) the logical state moves `Unauthenticated → PendingCallback →
//! Authenticated`, and back to `PendingCallback` on re-authorization. Only the state
//! registry guards validity; several pending flows for one user may coexist.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::state::OAuthStateRegistry;
use crate::error::CrmAuthError;
use crate::providers::{Provider, ProviderRegistry};
use crate::store::{AuthEvent, CredentialStore, CrmCredential};

#[derive(Debug, Serialize)]
pub struct CallbackOutcome {
    pub message: String,
}

pub struct OAuthFlowController {
    states: OAuthStateRegistry,
    providers: Arc<ProviderRegistry>,
    store: Arc<dyn CredentialStore>,
    default_token_lifetime: Duration,
}

impl OAuthFlowController {
    pub fn new(
        states: OAuthStateRegistry,
        providers: Arc<ProviderRegistry>,
        store: Arc<dyn CredentialStore>,
        default_token_lifetime: Duration,
    ) -> Self {
        Self {
            states,
            providers,
            store,
            default_token_lifetime,
        }
    }

    /// Start an authorization attempt. Always issues a fresh state.
    pub async fn init(&self, user_id: &str, provider: Provider) -> Result<String, CrmAuthError> {
        let crm = self.providers.get(provider)?;
        let state = self.states.issue(user_id, provider).await?;

        info!("Starting {provider} authorization for user {user_id}");
        Ok(crm.auth_url(&state))
    }

    /// Complete an authorization attempt from the CRM redirect.
    ///
    /// The code exchange is never retried; on any failure the caller restarts from `init`.
    pub async fn callback(
        &self,
        caller_user_id: &str,
        provider: Provider,
        code: &str,
        state: &str,
    ) -> Result<CallbackOutcome, CrmAuthError> {
        let (user_id, bound_provider) = self.states.consume(state).await?;

        if bound_provider != provider {
            warn!("State issued for {bound_provider} presented on {provider} callback");
            return Err(CrmAuthError::InvalidState);
        }
        if user_id != caller_user_id {
            warn!("State issued to user {user_id} presented by user {caller_user_id}");
            return Err(CrmAuthError::InvalidState);
        }

        let crm = self.providers.get(provider)?;
        let tokens = crm.exchange_code(code).await.map_err(|e| {
            warn!("{provider} code exchange failed for user {user_id}: {e}");
            e
        })?;

        let instance_url = match tokens.instance_url.clone() {
            Some(url) => url,
            None => crm.resolve_instance_url(&tokens.access_token).await?,
        };

        let now = Utc::now();
        let credential = CrmCredential {
            user_id: user_id.clone(),
            provider,
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            instance_url,
            token_type: tokens.token_type.clone(),
            scopes: tokens.scope.clone().unwrap_or_default(),
            expires_at: tokens.expires_at(now, self.default_token_lifetime),
            updated_at: now,
        };
        let stored = self.store.upsert(&credential).await?;

        let event = AuthEvent::new(&user_id, provider, AuthEvent::CONNECTED).with_metadata(json!({
            "instance_url": stored.instance_url,
            "expires_at": stored.expires_at,
            "has_refresh_token": stored.refresh_token.is_some(),
        }));
        if let Err(e) = self.store.log_event(&event).await {
            warn!("Failed to record connect event: {e}");
        }

        info!("{provider} connected for user {user_id} ({})", stored.instance_url);
        Ok(CallbackOutcome {
            message: format!("{} connected successfully", crm.display_name()),
        })
    }

    /// Disconnect: best-effort revoke at the CRM, then delete the stored credential.
    pub async fn revoke(&self, user_id: &str, provider: Provider) -> Result<(), CrmAuthError> {
        let credential = self
            .store
            .get(user_id, provider)
            .await?
            .ok_or(CrmAuthError::NotAuthenticated)?;

        match self.providers.get(provider) {
            Ok(crm) => {
                // Revoking the refresh token invalidates the access tokens issued from it.
                let token = credential
                    .refresh_token
                    .as_deref()
                    .unwrap_or(&credential.access_token);
                if let Err(e) = crm.revoke(token).await {
                    warn!("{provider} token revoke failed for user {user_id}: {e}");
                }
            }
            Err(e) => warn!("Skipping CRM-side revoke: {e}"),
        }

        self.store.delete(user_id, provider).await?;

        if let Err(e) = self
            .store
            .log_event(&AuthEvent::new(user_id, provider, AuthEvent::REVOKED))
            .await
        {
            warn!("Failed to record revoke event: {e}");
        }

        info!("{provider} disconnected for user {user_id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoEngine;
    use crate::providers::fake::FakeProvider;
    use crate::store::{MemoryCredentialStore, MemoryStateStore};
    use base64::Engine as _;
    use std::sync::Mutex;

    struct Harness {
        flow: OAuthFlowController,
        store: Arc<MemoryCredentialStore>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    fn harness(provider: FakeProvider) -> Harness {
        let b64 = base64::engine::general_purpose::STANDARD;
        let crypto = Arc::new(
            CryptoEngine::new(&b64.encode([1u8; 32]), &b64.encode([2u8; 32])).unwrap(),
        );
        let states = OAuthStateRegistry::new(
            Arc::new(MemoryStateStore::new()),
            crypto,
            Duration::from_secs(600),
        );

        let calls = provider.calls.clone();
        let mut providers = ProviderRegistry::new();
        providers.register(Box::new(provider));

        let store = Arc::new(MemoryCredentialStore::new());
        let flow = OAuthFlowController::new(
            states,
            Arc::new(providers),
            store.clone(),
            Duration::from_secs(7200),
        );
        Harness { flow, store, calls }
    }

    fn state_from(auth_url: &str) -> String {
        let url = url::Url::parse(auth_url).unwrap();
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn test_callback_persists_credential() {
        let h = harness(FakeProvider::new());
        let state = state_from(&h.flow.init("u1", Provider::Salesforce).await.unwrap());

        let outcome = h
            .flow
            .callback("u1", Provider::Salesforce, "code-1", &state)
            .await
            .unwrap();
        assert_eq!(outcome.message, "Salesforce connected successfully");

        let stored = h.store.get("u1", Provider::Salesforce).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "00Dfresh");
        assert_eq!(stored.refresh_token.as_deref(), Some("5Aep-refresh"));
        assert_eq!(stored.instance_url, "https://na1.salesforce.com");

        let remaining = stored.expires_at - Utc::now();
        assert!(remaining > chrono::Duration::seconds(3590));
        assert!(remaining <= chrono::Duration::seconds(3600));

        let events = h.store.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuthEvent::CONNECTED);
    }

    #[tokio::test]
    async fn test_callback_resolves_missing_instance_url() {
        let mut provider = FakeProvider::new();
        provider.tokens.instance_url = None;
        provider.tokens.expires_in = None;
        let h = harness(provider);
        let state = state_from(&h.flow.init("u1", Provider::Salesforce).await.unwrap());

        h.flow
            .callback("u1", Provider::Salesforce, "code-1", &state)
            .await
            .unwrap();

        let stored = h.store.get("u1", Provider::Salesforce).await.unwrap().unwrap();
        assert_eq!(stored.instance_url, "https://resolved.my.salesforce.com");
        assert!(stored.expires_at - Utc::now() > chrono::Duration::seconds(7100));
        assert!(h.calls.lock().unwrap().contains(&"userinfo:00Dfresh".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_state_skips_exchange() {
        let h = harness(FakeProvider::new());
        let err = h
            .flow
            .callback("u1", Provider::Salesforce, "code-1", "forged")
            .await
            .unwrap_err();

        assert!(matches!(err, CrmAuthError::InvalidState));
        assert!(h.calls.lock().unwrap().is_empty());
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_state_is_bound_to_user() {
        let h = harness(FakeProvider::new());
        let state = state_from(&h.flow.init("u1", Provider::Salesforce).await.unwrap());

        let err = h
            .flow
            .callback("u2", Provider::Salesforce, "code-1", &state)
            .await
            .unwrap_err();
        assert!(matches!(err, CrmAuthError::InvalidState));

        // The mismatched attempt still burns the state.
        let err = h
            .flow
            .callback("u1", Provider::Salesforce, "code-1", &state)
            .await
            .unwrap_err();
        assert!(matches!(err, CrmAuthError::InvalidState));
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_exchange_leaves_store_untouched() {
        let mut provider = FakeProvider::new();
        provider.exchange_failure = Some(Some(400));
        let h = harness(provider);
        let state = state_from(&h.flow.init("u1", Provider::Salesforce).await.unwrap());

        let err = h
            .flow
            .callback("u1", Provider::Salesforce, "bad-code", &state)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CrmAuthError::TokenExchangeFailed { upstream_status: Some(400), .. }
        ));
        assert!(h.store.is_empty().await);

        // The state was consumed before the exchange, so a retry must restart from init.
        let err = h
            .flow
            .callback("u1", Provider::Salesforce, "bad-code", &state)
            .await
            .unwrap_err();
        assert!(matches!(err, CrmAuthError::InvalidState));
    }

    #[tokio::test]
    async fn test_revoke_deletes_even_when_crm_fails() {
        let mut provider = FakeProvider::new();
        provider.revoke_fails = true;
        let h = harness(provider);
        let state = state_from(&h.flow.init("u1", Provider::Salesforce).await.unwrap());
        h.flow
            .callback("u1", Provider::Salesforce, "code-1", &state)
            .await
            .unwrap();

        h.flow.revoke("u1", Provider::Salesforce).await.unwrap();

        assert!(h.store.get("u1", Provider::Salesforce).await.unwrap().is_none());
        assert!(h.calls.lock().unwrap().contains(&"revoke:5Aep-refresh".to_string()));
        let events = h.store.events().await;
        assert_eq!(events.last().unwrap().event_type, AuthEvent::REVOKED);
    }

    #[tokio::test]
    async fn test_revoke_without_connection() {
        let h = harness(FakeProvider::new());
        assert!(matches!(
            h.flow.revoke("u1", Provider::Salesforce).await,
            Err(CrmAuthError::NotAuthenticated)
        ));
    }
}
