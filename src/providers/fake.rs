//! Scripted provider for unit tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::traits::{CrmProvider, Provider, TokenSet};
use crate::error::CrmAuthError;
use crate::leads::CrmLead;
use crate::store::CrmCredential;

pub(crate) struct FakeProvider {
    pub tokens: TokenSet,
    /// `Some(status)` makes the code exchange fail with that upstream status.
    pub exchange_failure: Option<Option<u16>>,
    pub refresh_fails: bool,
    pub revoke_fails: bool,
    /// Shared so tests can inspect it after the provider is boxed into a registry.
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            tokens: TokenSet {
                access_token: "00Dfresh".into(),
                refresh_token: Some("5Aep-refresh".into()),
                token_type: "Bearer".into(),
                expires_in: Some(3600),
                scope: Some("api refresh_token".into()),
                instance_url: Some("https://na1.salesforce.com".into()),
            },
            exchange_failure: None,
            refresh_fails: false,
            revoke_fails: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CrmProvider for FakeProvider {
    fn kind(&self) -> Provider {
        Provider::Salesforce
    }

    fn display_name(&self) -> &str {
        "Salesforce"
    }

    fn auth_url(&self, state: &str) -> String {
        format!("https://login.example.com/authorize?state={state}")
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, CrmAuthError> {
        self.record(format!("exchange:{code}"));
        match self.exchange_failure {
            Some(upstream_status) => Err(CrmAuthError::TokenExchangeFailed {
                upstream_status,
                detail: "invalid_grant".into(),
            }),
            None => Ok(self.tokens.clone()),
        }
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, CrmAuthError> {
        self.record(format!("refresh:{refresh_token}"));
        if self.refresh_fails {
            return Err(CrmAuthError::RefreshFailed("expired access/refresh token".into()));
        }
        Ok(TokenSet {
            access_token: "00Drefreshed".into(),
            refresh_token: None,
            ..self.tokens.clone()
        })
    }

    async fn resolve_instance_url(&self, access_token: &str) -> Result<String, CrmAuthError> {
        self.record(format!("userinfo:{access_token}"));
        Ok("https://resolved.my.salesforce.com".into())
    }

    async fn revoke(&self, token: &str) -> Result<(), CrmAuthError> {
        self.record(format!("revoke:{token}"));
        if self.revoke_fails {
            return Err(CrmAuthError::CrmRequestFailed {
                status: Some(503),
                detail: "unavailable".into(),
            });
        }
        Ok(())
    }

    async fn create_lead(
        &self,
        credential: &CrmCredential,
        lead: &CrmLead,
    ) -> Result<String, CrmAuthError> {
        self.record(format!("lead:{}:{}", credential.access_token, lead.last_name));
        Ok("00Q000000000001".into())
    }
}
