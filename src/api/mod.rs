//! HTTP router for markmail-crm-auth.
//!
//! - `/status`: health check
//! - `/crm/oauth/{provider}/...`: connect, callback, status, disconnect
//! - `/crm/{provider}/leads`: lead creation with the stored credential

pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::crm_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
