use anyhow::{bail, Context, Result};
use std::time::Duration;

/// Upper bound for every configured lifetime and for token lifetimes
/// reported by a CRM (one year).
pub const MAX_LIFETIME_SECS: u64 = 365 * 24 * 60 * 60;

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    pub base_url: String,

    // ── Database ────────────────────────────────────────────────────────
    /// PostgreSQL connection string. When unset the service keeps
    /// credentials and states in memory (local development only).
    pub database_url: Option<String>,

    // ── Crypto ──────────────────────────────────────────────────────────
    /// 32-byte base64-encoded master key for AES-256-GCM encryption of tokens.
    pub master_key: String,
    /// 32-byte base64-encoded HMAC key used to digest state tokens before storage.
    pub state_secret: String,

    // ── MarkMail user auth ──────────────────────────────────────────────
    /// HS256 secret shared with the MarkMail backend that issues user JWTs.
    pub jwt_secret: String,

    // ── OAuth flow ──────────────────────────────────────────────────────
    pub state_ttl: Duration,
    pub http_timeout: Duration,
    /// Lifetime assumed when the CRM does not report `expires_in`.
    pub default_token_lifetime: Duration,
    /// Credentials expiring within this window are refreshed before use.
    pub refresh_skew: Duration,

    // ── Salesforce ──────────────────────────────────────────────────────
    pub salesforce_client_id: Option<String>,
    pub salesforce_client_secret: Option<String>,
    pub salesforce_redirect_uri: String,
    pub salesforce_auth_url: String,
    pub salesforce_token_url: String,
    pub salesforce_revoke_url: String,
    pub salesforce_userinfo_url: String,
    pub salesforce_scopes: Vec<String>,
    pub salesforce_api_version: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".into());

        let sandbox = std::env::var("SALESFORCE_SANDBOX")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let login_host = if sandbox {
            "https://test.salesforce.com"
        } else {
            "https://login.salesforce.com"
        };

        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".into())
                .parse()
                .context("Invalid PORT")?,
            salesforce_redirect_uri: std::env::var("SALESFORCE_REDIRECT_URI")
                .unwrap_or_else(|_| format!("{base_url}/crm/oauth/salesforce/callback")),
            base_url,

            database_url: std::env::var("DATABASE_URL").ok(),
            master_key: std::env::var("MASTER_KEY")
                .context("MASTER_KEY is required (32 bytes, base64)")?,
            state_secret: std::env::var("STATE_SECRET")
                .context("STATE_SECRET is required (32 bytes, base64)")?,
            jwt_secret: std::env::var("JWT_SECRET")
                .context("JWT_SECRET is required to verify MarkMail user tokens")?,

            state_ttl: secs_var("OAUTH_STATE_TTL_SECS", 600)?,
            http_timeout: secs_var("CRM_HTTP_TIMEOUT_SECS", 15)?,
            default_token_lifetime: secs_var("DEFAULT_TOKEN_LIFETIME_SECS", 7200)?,
            refresh_skew: secs_var("TOKEN_REFRESH_SKEW_SECS", 300)?,

            salesforce_client_id: std::env::var("SALESFORCE_CLIENT_ID").ok(),
            salesforce_client_secret: std::env::var("SALESFORCE_CLIENT_SECRET").ok(),
            salesforce_auth_url: std::env::var("SALESFORCE_AUTH_URL")
                .unwrap_or_else(|_| format!("{login_host}/services/oauth2/authorize")),
            salesforce_token_url: std::env::var("SALESFORCE_TOKEN_URL")
                .unwrap_or_else(|_| format!("{login_host}/services/oauth2/token")),
            salesforce_revoke_url: std::env::var("SALESFORCE_REVOKE_URL")
                .unwrap_or_else(|_| format!("{login_host}/services/oauth2/revoke")),
            salesforce_userinfo_url: std::env::var("SALESFORCE_USERINFO_URL")
                .unwrap_or_else(|_| format!("{login_host}/services/oauth2/userinfo")),
            salesforce_scopes: std::env::var("SALESFORCE_SCOPES")
                .unwrap_or_else(|_| "api refresh_token offline_access".into())
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            salesforce_api_version: std::env::var("SALESFORCE_API_VERSION")
                .unwrap_or_else(|_| "v60.0".into()),
        })
    }
}

fn secs_var(name: &str, default: u64) -> Result<Duration> {
    parse_secs(name, std::env::var(name).ok().as_deref(), default)
}

fn parse_secs(name: &str, raw: Option<&str>, default: u64) -> Result<Duration> {
    let secs = match raw {
        Some(v) => v.parse().with_context(|| format!("Invalid {name}"))?,
        None => default,
    };
    if secs > MAX_LIFETIME_SECS {
        bail!("{name} must be at most {MAX_LIFETIME_SECS} seconds, got {secs}");
    }
    Ok(Duration::from_secs(secs))
}

/// Convert to a `chrono::Duration`, capped at [`MAX_LIFETIME_SECS`].
pub fn bounded_delta(d: Duration) -> chrono::Duration {
    let secs = d.as_secs().min(MAX_LIFETIME_SECS);
    chrono::Duration::seconds(secs as i64)
}
