use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::error::CrmAuthError;
use crate::providers::Provider;
use crate::store::CredentialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Authenticated,
    CredentialExpired,
    NotAuthenticated,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub is_authenticated: bool,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Read-only view of a user's CRM connection. Never refreshes or writes.
pub struct CrmStatusReporter {
    store: Arc<dyn CredentialStore>,
}

impl CrmStatusReporter {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    pub async fn status(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<AuthStatus, CrmAuthError> {
        let credential = match self.store.get(user_id, provider).await? {
            Some(c) => c,
            None => {
                return Ok(AuthStatus {
                    is_authenticated: false,
                    state: ConnectionState::NotAuthenticated,
                    instance_url: None,
                    expires_at: None,
                })
            }
        };

        let live = !credential.is_expired_at(Utc::now());
        Ok(AuthStatus {
            is_authenticated: live,
            state: if live {
                ConnectionState::Authenticated
            } else {
                ConnectionState::CredentialExpired
            },
            instance_url: Some(credential.instance_url),
            expires_at: Some(credential.expires_at),
        })
    }
}
