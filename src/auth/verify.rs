//! Caller authentication: MarkMail session JWTs (HS256, shared secret).

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::CrmAuthError;

// ─────────────────────────────────────────────────────────────────────────────
// Auth Context
// ─────────────────────────────────────────────────────────────────────────────

/// The authenticated MarkMail user behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// MarkMail JWT payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Verification
// ─────────────────────────────────────────────────────────────────────────────

pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a bearer token and return the user it identifies.
    pub fn verify(&self, token: &str) -> Result<AuthUser, CrmAuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => CrmAuthError::TokenExpired,
                _ => CrmAuthError::InvalidToken(format!("JWT verification failed: {e}")),
            }
        })?;

        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(CrmAuthError::InvalidToken("JWT has an empty subject".into()));
        }

        Ok(AuthUser {
            user_id: claims.sub,
            email: claims.email,
            name: claims.name,
        })
    }

    /// Extract and verify the token from an `Authorization: Bearer ...` header value.
    pub fn verify_header(&self, header: Option<&str>) -> Result<AuthUser, CrmAuthError> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(CrmAuthError::Unauthorized)?;

        self.verify(token)
    }
}
