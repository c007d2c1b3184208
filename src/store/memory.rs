//! In-process stores for tests and local runs without PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

use super::{AuthEvent, CredentialStore, CrmCredential};
use crate::error::CrmAuthError;
use crate::oauth::{OAuthState, StateStore};
use crate::providers::Provider;

#[derive(Default)]
pub struct MemoryCredentialStore {
    rows: RwLock<HashMap<(String, Provider), CrmCredential>>,
    events: Mutex<Vec<AuthEvent>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the audit log, oldest first.
    pub async fn events(&self) -> Vec<AuthEvent> {
        self.events.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<CrmCredential>, CrmAuthError> {
        let rows = self.rows.read().await;
        Ok(rows.get(&(user_id.to_string(), provider)).cloned())
    }

    async fn upsert(&self, credential: &CrmCredential) -> Result<CrmCredential, CrmAuthError> {
        let mut rows = self.rows.write().await;
        let key = (credential.user_id.clone(), credential.provider);

        let mut stored = credential.clone();
        stored.updated_at = Utc::now();
        if stored.refresh_token.is_none() {
            stored.refresh_token = rows.get(&key).and_then(|c| c.refresh_token.clone());
        }

        rows.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, user_id: &str, provider: Provider) -> Result<bool, CrmAuthError> {
        let mut rows = self.rows.write().await;
        Ok(rows.remove(&(user_id.to_string(), provider)).is_some())
    }

    async fn log_event(&self, event: &AuthEvent) -> Result<(), CrmAuthError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, OAuthState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.lock().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn insert_state(&self, state: &OAuthState) -> Result<(), CrmAuthError> {
        let mut states = self.states.lock().await;
        states.insert(state.state_digest.clone(), state.clone());
        Ok(())
    }

    async fn take_state(&self, state_digest: &str) -> Result<Option<OAuthState>, CrmAuthError> {
        let mut states = self.states.lock().await;
        Ok(states.remove(state_digest))
    }

    async fn purge_states_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CrmAuthError> {
        let mut states = self.states.lock().await;
        let before = states.len();
        states.retain(|_, s| s.created_at >= cutoff);
        Ok((before - states.len()) as u64)
    }
}
