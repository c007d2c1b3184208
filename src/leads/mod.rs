//! Lead sync: the consumer of stored CRM credentials.

mod client;
mod lead;

pub use client::{LeadCreated, LeadSyncClient};
pub use lead::CrmLead;
