pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod leads;
pub mod oauth;
pub mod providers;
pub mod store;

pub use config::Config;
pub use error::CrmAuthError;

use std::sync::Arc;

use auth::TokenVerifier;
use crypto::CryptoEngine;
use leads::LeadSyncClient;
use oauth::{CrmStatusReporter, OAuthFlowController, OAuthStateRegistry, StateStore};
use providers::ProviderRegistry;
use store::CredentialStore;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub verifier: TokenVerifier,
    pub flow: OAuthFlowController,
    pub status: CrmStatusReporter,
    pub leads: LeadSyncClient,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the components over the given stores and providers.
    pub fn new(
        config: &Config,
        crypto: Arc<CryptoEngine>,
        credentials: Arc<dyn CredentialStore>,
        states: Arc<dyn StateStore>,
        providers: ProviderRegistry,
    ) -> Self {
        let providers = Arc::new(providers);
        let registry = OAuthStateRegistry::new(states, crypto, config.state_ttl);

        Self {
            verifier: TokenVerifier::new(&config.jwt_secret),
            flow: OAuthFlowController::new(
                registry,
                providers.clone(),
                credentials.clone(),
                config.default_token_lifetime,
            ),
            status: CrmStatusReporter::new(credentials.clone()),
            leads: LeadSyncClient::new(
                credentials,
                providers,
                config.refresh_skew,
                config.default_token_lifetime,
            ),
        }
    }
}
