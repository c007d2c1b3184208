use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use markmail_crm_auth::crypto::CryptoEngine;
use markmail_crm_auth::oauth::StateStore;
use markmail_crm_auth::providers::{self, ProviderRegistry};
use markmail_crm_auth::store::{
    CredentialStore, MemoryCredentialStore, MemoryStateStore, PgStore,
};
use markmail_crm_auth::{api, AppState, Config, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "markmail_crm_auth=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("markmail-crm-auth v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    let crypto = Arc::new(CryptoEngine::new(&config.master_key, &config.state_secret)?);

    let (credentials, states): (Arc<dyn CredentialStore>, Arc<dyn StateStore>) =
        match &config.database_url {
            Some(url) => {
                let store = Arc::new(PgStore::new(url, crypto.clone()).await?);
                store.migrate().await?;
                info!("Database connected and migrated");
                let credentials: Arc<dyn CredentialStore> = store.clone();
                let states: Arc<dyn StateStore> = store;
                (credentials, states)
            }
            None => {
                warn!("DATABASE_URL not set, using in-memory stores (data is lost on restart)");
                let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
                let states: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
                (credentials, states)
            }
        };

    let mut registry = ProviderRegistry::new();
    providers::register_defaults(&mut registry, &config)?;
    info!("Registered {} CRM providers", registry.count());

    let state: SharedState = Arc::new(AppState::new(
        &config,
        crypto,
        credentials,
        states,
        registry,
    ));

    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready");
    axum::serve(listener, app).await?;

    Ok(())
}
