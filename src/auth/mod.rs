mod verify;

pub use verify::{AuthUser, Claims, TokenVerifier};
