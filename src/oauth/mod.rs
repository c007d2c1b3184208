mod flow;
mod state;
mod status;

pub use flow::{CallbackOutcome, OAuthFlowController};
pub use state::{OAuthState, OAuthStateRegistry, StateStore};
pub use status::{AuthStatus, ConnectionState, CrmStatusReporter};
