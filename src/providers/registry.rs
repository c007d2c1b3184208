use std::collections::HashMap;

use super::traits::{CrmProvider, Provider};
use crate::error::CrmAuthError;

/// Registry of configured CRM providers, keyed by provider kind.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, Box<dyn CrmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new provider.
    pub fn register(&mut self, provider: Box<dyn CrmProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    /// Get a configured provider, or `ProviderNotFound` when it has no credentials.
    pub fn get(&self, kind: Provider) -> Result<&dyn CrmProvider, CrmAuthError> {
        self.providers
            .get(&kind)
            .map(|p| p.as_ref())
            .ok_or_else(|| CrmAuthError::ProviderNotFound(kind.to_string()))
    }

    /// Number of registered providers.
    pub fn count(&self) -> usize {
        self.providers.len()
    }
}
