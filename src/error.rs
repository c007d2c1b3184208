use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the markmail-crm-auth service.
#[derive(Debug, thiserror::Error)]
pub enum CrmAuthError {
    // ── Caller Auth Errors ──────────────────────────────────────────────
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    // ── OAuth Flow Errors ───────────────────────────────────────────────
    #[error("Invalid or expired state parameter, please restart the connection process")]
    InvalidState,

    /// The CRM rejected the authorization code or could not be reached.
    /// `upstream_status` is `None` for transport failures and timeouts.
    #[error("Token exchange failed: {detail}")]
    TokenExchangeFailed {
        upstream_status: Option<u16>,
        detail: String,
    },

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    // ── Credential Errors ───────────────────────────────────────────────
    #[error("No CRM credential on file, connect the CRM first")]
    NotAuthenticated,

    #[error("CRM credential expired, reconnect the CRM")]
    CredentialExpired,

    // ── CRM API Errors ──────────────────────────────────────────────────
    /// A CRM API call failed. `status` is `None` when the CRM never answered.
    #[error("CRM request failed: {detail}")]
    CrmRequestFailed {
        status: Option<u16>,
        detail: String,
    },

    #[error("Provider {0} not found")]
    ProviderNotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for CrmAuthError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        CrmAuthError::Database(e.to_string())
    }
}

impl From<anyhow::Error> for CrmAuthError {
    fn from(e: anyhow::Error) -> Self {
        CrmAuthError::Internal(e.to_string())
    }
}

/// 4xx from the CRM stays a client error, anything else becomes a gateway error.
fn upstream_class(status: u16) -> StatusCode {
    if (400..500).contains(&status) {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::BAD_GATEWAY
    }
}

impl CrmAuthError {
    /// HTTP status and stable error code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            CrmAuthError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            CrmAuthError::InvalidToken(_) => (StatusCode::UNAUTHORIZED, "invalid_token"),
            CrmAuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "token_expired"),
            CrmAuthError::InvalidState => (StatusCode::BAD_REQUEST, "invalid_state"),
            CrmAuthError::TokenExchangeFailed {
                upstream_status, ..
            } => match upstream_status {
                Some(s) => (upstream_class(*s), "token_exchange_failed"),
                None => (StatusCode::GATEWAY_TIMEOUT, "token_exchange_failed"),
            },
            CrmAuthError::RefreshFailed(_) => (StatusCode::BAD_GATEWAY, "refresh_failed"),
            CrmAuthError::NotAuthenticated => (StatusCode::NOT_FOUND, "not_authenticated"),
            CrmAuthError::CredentialExpired => (StatusCode::UNAUTHORIZED, "credential_expired"),
            CrmAuthError::CrmRequestFailed { status, .. } => match status {
                Some(s) => (upstream_class(*s), "crm_request_failed"),
                None => (StatusCode::GATEWAY_TIMEOUT, "crm_request_failed"),
            },
            CrmAuthError::ProviderNotFound(_) => (StatusCode::NOT_FOUND, "provider_not_found"),
            CrmAuthError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            CrmAuthError::Crypto(_) => (StatusCode::INTERNAL_SERVER_ERROR, "crypto_error"),
            CrmAuthError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            CrmAuthError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for CrmAuthError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let mut error = json!({
            "code": code,
            "message": self.to_string(),
        });

        let upstream = match &self {
            CrmAuthError::TokenExchangeFailed {
                upstream_status, ..
            } => *upstream_status,
            CrmAuthError::CrmRequestFailed { status, .. } => *status,
            _ => None,
        };
        if let Some(s) = upstream {
            error["upstream_status"] = json!(s);
        }

        (status, axum::Json(json!({ "error": error }))).into_response()
    }
}
