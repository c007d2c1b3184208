#[cfg(test)]
pub(crate) mod fake;
mod registry;
mod salesforce;
mod traits;

pub use registry::ProviderRegistry;
pub use salesforce::{SalesforceProvider, SalesforceSettings};
pub use traits::{CrmProvider, Provider, TokenSet};

use crate::config::Config;
use crate::error::CrmAuthError;

/// Register every CRM that has connected-app credentials configured.
pub fn register_defaults(
    registry: &mut ProviderRegistry,
    config: &Config,
) -> Result<(), CrmAuthError> {
    match SalesforceSettings::from_config(config) {
        Some(settings) => registry.register(Box::new(SalesforceProvider::new(settings)?)),
        None => tracing::warn!(
            "SALESFORCE_CLIENT_ID/SALESFORCE_CLIENT_SECRET not set, Salesforce disabled"
        ),
    }
    Ok(())
}
