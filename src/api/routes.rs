//! API route handlers for the CRM connection service.
//!
//! All handlers receive `SharedState` via Axum state extraction. Every
//! endpoint except `/status` requires a MarkMail bearer token.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::auth::AuthUser;
use crate::error::CrmAuthError;
use crate::leads::CrmLead;
use crate::providers::Provider;
use crate::SharedState;

// =============================================================================
// Router
// =============================================================================

pub fn crm_router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── OAuth ────────────────────────────────────────────────────────
        .route("/crm/oauth/{provider}/init", get(oauth_init))
        .route("/crm/oauth/{provider}/callback", get(oauth_callback))
        .route("/crm/oauth/{provider}/status", get(oauth_status))
        .route("/crm/oauth/{provider}", delete(oauth_revoke))
        // ── Leads ────────────────────────────────────────────────────────
        .route("/crm/{provider}/leads", post(lead_create))
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "markmail-crm-auth",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// Helpers
// =============================================================================

/// Extract and verify the caller from the `Authorization` header.
fn require_auth(state: &SharedState, headers: &HeaderMap) -> Result<AuthUser, CrmAuthError> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    state.verifier.verify_header(header)
}

fn parse_provider(raw: &str) -> Result<Provider, CrmAuthError> {
    raw.parse()
}

// =============================================================================
// OAuth Endpoints
// =============================================================================

/// GET /crm/oauth/:provider/init: Start a connection; returns the CRM consent URL.
async fn oauth_init(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(provider): Path<String>,
) -> Result<Json<Value>, CrmAuthError> {
    let user = require_auth(&state, &headers)?;
    let provider = parse_provider(&provider)?;

    let auth_url = state.flow.init(&user.user_id, provider).await?;
    Ok(Json(json!({ "auth_url": auth_url })))
}

#[derive(Deserialize)]
struct OAuthCallbackQuery {
    code: Option<String>,
    state: Option<String>,
    /// Set by the CRM when the user denied consent.
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /crm/oauth/:provider/callback: Complete a connection.
async fn oauth_callback(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(provider): Path<String>,
    Query(q): Query<OAuthCallbackQuery>,
) -> Result<Json<Value>, CrmAuthError> {
    let user = require_auth(&state, &headers)?;
    let provider = parse_provider(&provider)?;

    if let Some(error) = q.error {
        let detail = q.error_description.unwrap_or(error);
        tracing::info!("{provider} authorization denied for user {}: {detail}", user.user_id);
        return Err(CrmAuthError::BadRequest(format!("Authorization denied: {detail}")));
    }

    let code = q
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| CrmAuthError::BadRequest("missing code parameter".into()))?;
    let oauth_state = q
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CrmAuthError::BadRequest("missing state parameter".into()))?;

    let outcome = state
        .flow
        .callback(&user.user_id, provider, &code, &oauth_state)
        .await?;
    Ok(Json(json!({ "message": outcome.message })))
}

/// GET /crm/oauth/:provider/status: Connection status; never refreshes.
async fn oauth_status(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(provider): Path<String>,
) -> Result<Json<Value>, CrmAuthError> {
    let user = require_auth(&state, &headers)?;
    let provider = parse_provider(&provider)?;

    let status = state.status.status(&user.user_id, provider).await?;
    Ok(Json(json!(status)))
}

/// DELETE /crm/oauth/:provider: Disconnect.
async fn oauth_revoke(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(provider): Path<String>,
) -> Result<Json<Value>, CrmAuthError> {
    let user = require_auth(&state, &headers)?;
    let provider = parse_provider(&provider)?;

    state.flow.revoke(&user.user_id, provider).await?;
    Ok(Json(json!({ "message": format!("Disconnected from {provider}") })))
}

// =============================================================================
// Lead Endpoints
// =============================================================================

#[derive(Deserialize)]
struct CreateLeadBody {
    form_name: String,
    data: Map<String, Value>,
}

/// POST /crm/:provider/leads: Create a lead from a form submission.
async fn lead_create(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(provider): Path<String>,
    body: Result<Json<CreateLeadBody>, JsonRejection>,
) -> Result<impl IntoResponse, CrmAuthError> {
    let user = require_auth(&state, &headers)?;
    let provider = parse_provider(&provider)?;
    let Json(body) = body.map_err(|e| CrmAuthError::BadRequest(e.body_text()))?;

    let lead = CrmLead::from_submission(&body.form_name, &body.data)
        .ok_or_else(|| CrmAuthError::BadRequest("submission has no email".into()))?;

    let created = state.leads.create_lead(&user.user_id, provider, &lead).await?;
    Ok((StatusCode::CREATED, Json(json!(created))))
}
