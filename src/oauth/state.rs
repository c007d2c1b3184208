use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::config::bounded_delta;
use crate::crypto::CryptoEngine;
use crate::error::CrmAuthError;
use crate::providers::Provider;

/// A pending authorization request. The raw state token is never stored,
/// only its keyed digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    pub state_digest: String,
    pub user_id: String,
    pub provider: Provider,
    pub created_at: DateTime<Utc>,
}

/// Storage for pending states.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn insert_state(&self, state: &OAuthState) -> Result<(), CrmAuthError>;

    /// Remove and return the state in one step; at most one caller gets `Some`.
    async fn take_state(&self, state_digest: &str) -> Result<Option<OAuthState>, CrmAuthError>;

    /// Delete states created before `cutoff`. Returns how many were removed.
    async fn purge_states_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CrmAuthError>;
}

/// Issues and validates single-use, short-lived OAuth `state` tokens.
pub struct OAuthStateRegistry {
    store: Arc<dyn StateStore>,
    crypto: Arc<CryptoEngine>,
    ttl: chrono::Duration,
}

impl OAuthStateRegistry {
    pub fn new(store: Arc<dyn StateStore>, crypto: Arc<CryptoEngine>, ttl: Duration) -> Self {
        Self {
            store,
            crypto,
            ttl: bounded_delta(ttl),
        }
    }

    /// Issue a fresh state bound to `user_id` and `provider`.
    pub async fn issue(&self, user_id: &str, provider: Provider) -> Result<String, CrmAuthError> {
        let now = Utc::now();
        self.sweep(now).await;

        let token = self.crypto.new_state_token();
        let state = OAuthState {
            state_digest: self.crypto.state_digest(&token)?,
            user_id: user_id.to_string(),
            provider,
            created_at: now,
        };
        self.store.insert_state(&state).await?;

        Ok(token)
    }

    /// Consume a state token, returning the identity it was issued to.
    ///
    /// Unknown, already-consumed and expired tokens all yield `InvalidState`.
    pub async fn consume(&self, state_token: &str) -> Result<(String, Provider), CrmAuthError> {
        let now = Utc::now();
        self.sweep(now).await;

        let digest = self.crypto.state_digest(state_token)?;
        let state = self
            .store
            .take_state(&digest)
            .await?
            .ok_or(CrmAuthError::InvalidState)?;

        // A sweep may not have run between issue and now.
        if state.created_at + self.ttl < now {
            tracing::debug!("State for user {} expired", state.user_id);
            return Err(CrmAuthError::InvalidState);
        }

        Ok((state.user_id, state.provider))
    }

    /// Lazy purge of expired entries. Failures only cost storage, so they are logged.
    async fn sweep(&self, now: DateTime<Utc>) {
        match self.store.purge_states_before(now - self.ttl).await {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Purged {n} expired OAuth states"),
            Err(e) => tracing::warn!("Failed to purge expired OAuth states: {e}"),
        }
    }
}
