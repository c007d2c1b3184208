//! PostgreSQL-backed stores for CRM credentials, OAuth states and audit events.
//!
//! Tables:
//! - `crm_integrations`: encrypted CRM tokens per (user_id, provider)
//! - `crm_oauth_states`: pending authorization states, keyed by HMAC digest
//! - `crm_auth_events`: audit log for connect/refresh/revoke

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{PgPool, Row};
use std::sync::Arc;

use super::{AuthEvent, CredentialStore, CrmCredential};
use crate::crypto::CryptoEngine;
use crate::error::CrmAuthError;
use crate::oauth::{OAuthState, StateStore};
use crate::providers::Provider;

/// Credential and state store backed by PostgreSQL.
pub struct PgStore {
    pool: PgPool,
    crypto: Arc<CryptoEngine>,
}

impl PgStore {
    pub async fn new(db_url: &str, crypto: Arc<CryptoEngine>) -> Result<Self, CrmAuthError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(20)
            .connect(db_url)
            .await
            .map_err(|e| CrmAuthError::Database(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool, crypto })
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> Result<(), CrmAuthError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crm_integrations (
                id              UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id         TEXT NOT NULL,
                provider        TEXT NOT NULL,
                credentials     JSONB NOT NULL,
                instance_url    TEXT NOT NULL,
                token_type      TEXT NOT NULL DEFAULT 'Bearer',
                scopes          TEXT NOT NULL DEFAULT '',
                expires_at      TIMESTAMPTZ NOT NULL,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE(user_id, provider)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crm_oauth_states (
                state_digest    TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL,
                provider        TEXT NOT NULL,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crm_auth_events (
                id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id     TEXT NOT NULL,
                provider    TEXT NOT NULL,
                event_type  TEXT NOT NULL,
                metadata    JSONB NOT NULL DEFAULT '{}',
                created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_crm_oauth_states_created ON crm_oauth_states(created_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_crm_auth_events_user ON crm_auth_events(user_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn parse_provider(raw: &str) -> Result<Provider, CrmAuthError> {
        raw.parse()
            .map_err(|_| CrmAuthError::Database(format!("Unknown provider in row: {raw}")))
    }

    fn decrypt_json_token(
        &self,
        credentials: &serde_json::Value,
        field: &str,
    ) -> Result<Option<String>, CrmAuthError> {
        match credentials.get(field).and_then(|v| v.as_str()) {
            Some(enc) if !enc.is_empty() => Ok(Some(self.crypto.decrypt(enc)?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn get(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<CrmCredential>, CrmAuthError> {
        let row = sqlx::query(
            r#"
            SELECT credentials, instance_url, token_type, scopes, expires_at, updated_at
            FROM crm_integrations
            WHERE user_id = $1 AND provider = $2
            "#,
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let credentials: serde_json::Value = row.get(0);
        let access_token = self
            .decrypt_json_token(&credentials, "access_token")?
            .ok_or_else(|| CrmAuthError::Database("credential row has no access_token".into()))?;
        let refresh_token = self.decrypt_json_token(&credentials, "refresh_token")?;

        Ok(Some(CrmCredential {
            user_id: user_id.to_string(),
            provider,
            access_token,
            refresh_token,
            instance_url: row.get(1),
            token_type: row.get(2),
            scopes: row.get(3),
            expires_at: row.get(4),
            updated_at: row.get(5),
        }))
    }

    async fn upsert(&self, credential: &CrmCredential) -> Result<CrmCredential, CrmAuthError> {
        let enc_access = self.crypto.encrypt(&credential.access_token)?;
        let enc_refresh = match &credential.refresh_token {
            Some(rt) => Some(self.crypto.encrypt(rt)?),
            None => None,
        };
        let credentials = json!({
            "access_token": enc_access,
            "refresh_token": enc_refresh,
        });

        let row = sqlx::query(
            r#"
            INSERT INTO crm_integrations
                (user_id, provider, credentials, instance_url, token_type, scopes, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, provider)
            DO UPDATE SET
                credentials = jsonb_build_object(
                    'access_token', EXCLUDED.credentials->'access_token',
                    'refresh_token', COALESCE(
                        NULLIF(EXCLUDED.credentials->'refresh_token', 'null'::jsonb),
                        crm_integrations.credentials->'refresh_token'
                    )
                ),
                instance_url = EXCLUDED.instance_url,
                token_type = EXCLUDED.token_type,
                scopes = EXCLUDED.scopes,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            RETURNING credentials, updated_at
            "#,
        )
        .bind(&credential.user_id)
        .bind(credential.provider.as_str())
        .bind(&credentials)
        .bind(&credential.instance_url)
        .bind(&credential.token_type)
        .bind(&credential.scopes)
        .bind(credential.expires_at)
        .fetch_one(&self.pool)
        .await?;

        let stored_credentials: serde_json::Value = row.get(0);
        let updated_at: DateTime<Utc> = row.get(1);

        let mut stored = credential.clone();
        stored.refresh_token = self.decrypt_json_token(&stored_credentials, "refresh_token")?;
        stored.updated_at = updated_at;
        Ok(stored)
    }

    async fn delete(&self, user_id: &str, provider: Provider) -> Result<bool, CrmAuthError> {
        let affected = sqlx::query("DELETE FROM crm_integrations WHERE user_id = $1 AND provider = $2")
            .bind(user_id)
            .bind(provider.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(affected > 0)
    }

    async fn log_event(&self, event: &AuthEvent) -> Result<(), CrmAuthError> {
        sqlx::query(
            r#"
            INSERT INTO crm_auth_events (user_id, provider, event_type, metadata)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&event.user_id)
        .bind(event.provider.as_str())
        .bind(event.event_type)
        .bind(&event.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StateStore for PgStore {
    async fn insert_state(&self, state: &OAuthState) -> Result<(), CrmAuthError> {
        sqlx::query(
            r#"
            INSERT INTO crm_oauth_states (state_digest, user_id, provider, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&state.state_digest)
        .bind(&state.user_id)
        .bind(state.provider.as_str())
        .bind(state.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn take_state(&self, state_digest: &str) -> Result<Option<OAuthState>, CrmAuthError> {
        // DELETE .. RETURNING: of two concurrent callbacks only one gets the row.
        let row = sqlx::query(
            r#"
            DELETE FROM crm_oauth_states
            WHERE state_digest = $1
            RETURNING user_id, provider, created_at
            "#,
        )
        .bind(state_digest)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let provider: String = row.get(1);
        Ok(Some(OAuthState {
            state_digest: state_digest.to_string(),
            user_id: row.get(0),
            provider: Self::parse_provider(&provider)?,
            created_at: row.get(2),
        }))
    }

    async fn purge_states_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CrmAuthError> {
        let affected = sqlx::query("DELETE FROM crm_oauth_states WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(affected)
    }
}
