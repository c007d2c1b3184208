use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::traits::{CrmProvider, Provider, TokenSet};
use crate::config::Config;
use crate::error::CrmAuthError;
use crate::leads::CrmLead;
use crate::store::CrmCredential;

/// Endpoint and client settings for a Salesforce connected app.
#[derive(Debug, Clone)]
pub struct SalesforceSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub revoke_url: String,
    pub userinfo_url: String,
    pub scopes: Vec<String>,
    pub api_version: String,
    pub timeout: Duration,
}

impl SalesforceSettings {
    /// `None` when the connected app credentials are not configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let (client_id, client_secret) = match (
            &config.salesforce_client_id,
            &config.salesforce_client_secret,
        ) {
            (Some(id), Some(secret)) => (id.clone(), secret.clone()),
            _ => return None,
        };

        Some(Self {
            client_id,
            client_secret,
            redirect_uri: config.salesforce_redirect_uri.clone(),
            auth_url: config.salesforce_auth_url.clone(),
            token_url: config.salesforce_token_url.clone(),
            revoke_url: config.salesforce_revoke_url.clone(),
            userinfo_url: config.salesforce_userinfo_url.clone(),
            scopes: config.salesforce_scopes.clone(),
            api_version: config.salesforce_api_version.clone(),
            timeout: config.http_timeout,
        })
    }
}

/// Salesforce OAuth 2.0 web server flow.
///
/// Quirks:
/// - Token responses carry `instance_url` and usually no `expires_in`.
/// - Refresh responses never rotate the refresh token.
/// - `refresh_token` / `offline_access` scopes are needed to get a refresh token.
pub struct SalesforceProvider {
    settings: SalesforceSettings,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SalesforceTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: Option<u64>,
    scope: Option<String>,
    instance_url: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl From<SalesforceTokenResponse> for TokenSet {
    fn from(r: SalesforceTokenResponse) -> Self {
        TokenSet {
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            token_type: r.token_type,
            expires_in: r.expires_in,
            scope: r.scope,
            instance_url: r.instance_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SalesforceUserInfo {
    urls: SalesforceUrls,
}

#[derive(Debug, Deserialize)]
struct SalesforceUrls {
    rest: String,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    id: String,
}

impl SalesforceProvider {
    pub fn new(settings: SalesforceSettings) -> Result<Self, CrmAuthError> {
        // Redirects stay disabled so a token endpoint cannot bounce us elsewhere.
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CrmAuthError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { settings, http })
    }

    async fn token_request(
        &self,
        form: &[(&str, &str)],
    ) -> Result<Result<TokenSet, (Option<u16>, String)>, CrmAuthError> {
        let resp = match self.http.post(&self.settings.token_url).form(form).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return Ok(Err((
                    None,
                    format!(
                        "Salesforce token endpoint timed out after {}s",
                        self.settings.timeout.as_secs()
                    ),
                )))
            }
            Err(e) => return Ok(Err((None, format!("Token request failed: {e}")))),
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Ok(Err((Some(status.as_u16()), body)));
        }

        match resp.json::<SalesforceTokenResponse>().await {
            Ok(token_resp) => Ok(Ok(token_resp.into())),
            Err(e) if e.is_timeout() => Ok(Err((
                None,
                format!("Timed out reading token response: {e}"),
            ))),
            Err(e) => Ok(Err((
                Some(status.as_u16()),
                format!("Malformed token response: {e}"),
            ))),
        }
    }
}

#[async_trait]
impl CrmProvider for SalesforceProvider {
    fn kind(&self) -> Provider {
        Provider::Salesforce
    }

    fn display_name(&self) -> &str {
        "Salesforce"
    }

    fn auth_url(&self, state: &str) -> String {
        let scope_str = self.settings.scopes.join(" ");
        format!(
            "{base}?\
             client_id={client_id}\
             &redirect_uri={redirect_uri}\
             &response_type=code\
             &scope={scope}\
             &state={state}",
            base = self.settings.auth_url,
            client_id = urlencoding(&self.settings.client_id),
            redirect_uri = urlencoding(&self.settings.redirect_uri),
            scope = urlencoding(&scope_str),
            state = urlencoding(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, CrmAuthError> {
        let outcome = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
            ])
            .await?;

        outcome.map_err(|(upstream_status, detail)| CrmAuthError::TokenExchangeFailed {
            upstream_status,
            detail,
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, CrmAuthError> {
        let outcome = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
            ])
            .await?;

        outcome.map_err(|(status, detail)| match status {
            Some(s) => CrmAuthError::RefreshFailed(format!("Salesforce returned {s}: {detail}")),
            None => CrmAuthError::RefreshFailed(detail),
        })
    }

    async fn resolve_instance_url(&self, access_token: &str) -> Result<String, CrmAuthError> {
        tracing::debug!("Resolving instance URL via {}", self.settings.userinfo_url);

        let resp = self
            .http
            .get(&self.settings.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| CrmAuthError::TokenExchangeFailed {
                upstream_status: None,
                detail: format!("Userinfo request failed: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CrmAuthError::TokenExchangeFailed {
                upstream_status: Some(status.as_u16()),
                detail: format!("Userinfo request failed: {body}"),
            });
        }

        let malformed = |detail: String| CrmAuthError::TokenExchangeFailed {
            upstream_status: Some(status.as_u16()),
            detail,
        };
        let info: SalesforceUserInfo = resp
            .json()
            .await
            .map_err(|e| malformed(format!("Malformed userinfo response: {e}")))?;

        extract_instance_url(&info.urls.rest).map_err(|e| malformed(e.to_string()))
    }

    async fn revoke(&self, token: &str) -> Result<(), CrmAuthError> {
        let resp = self
            .http
            .post(&self.settings.revoke_url)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| CrmAuthError::CrmRequestFailed {
                status: None,
                detail: format!("Revoke request failed: {e}"),
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(CrmAuthError::CrmRequestFailed {
                status: Some(status),
                detail: body,
            });
        }
        Ok(())
    }

    async fn create_lead(
        &self,
        credential: &CrmCredential,
        lead: &CrmLead,
    ) -> Result<String, CrmAuthError> {
        let url = format!(
            "{}/services/data/{}/sobjects/Lead/",
            credential.instance_url.trim_end_matches('/'),
            self.settings.api_version
        );

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&credential.access_token)
            .json(&lead.to_salesforce_fields())
            .send()
            .await
            .map_err(|e| CrmAuthError::CrmRequestFailed {
                status: None,
                detail: format!("Lead create request failed: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CrmAuthError::CrmRequestFailed {
                status: Some(status.as_u16()),
                detail: body,
            });
        }

        let created: CreateRecordResponse =
            resp.json().await.map_err(|e| CrmAuthError::CrmRequestFailed {
                status: (!e.is_timeout()).then(|| status.as_u16()),
                detail: format!("Malformed Lead response: {e}"),
            })?;

        Ok(created.id)
    }
}

/// "https://na1.salesforce.com/services/data/v59.0/" -> "https://na1.salesforce.com"
fn extract_instance_url(rest_url: &str) -> Result<String, CrmAuthError> {
    match rest_url.split_once("/services/data/") {
        Some((base, _)) if !base.is_empty() => Ok(base.to_string()),
        _ => Err(CrmAuthError::Internal(format!(
            "Unexpected REST URL format: {rest_url}"
        ))),
    }
}

fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SalesforceSettings {
        SalesforceSettings {
            client_id: "test_client_id".into(),
            client_secret: "test_client_secret".into(),
            redirect_uri: "http://localhost:3000/crm/oauth/salesforce/callback".into(),
            auth_url: "https://login.salesforce.com/services/oauth2/authorize".into(),
            token_url: "https://login.salesforce.com/services/oauth2/token".into(),
            revoke_url: "https://login.salesforce.com/services/oauth2/revoke".into(),
            userinfo_url: "https://login.salesforce.com/services/oauth2/userinfo".into(),
            scopes: vec!["api".into(), "refresh_token".into(), "offline_access".into()],
            api_version: "v60.0".into(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_auth_url_generation() {
        let provider = SalesforceProvider::new(settings()).unwrap();
        let url = provider.auth_url("s1");

        assert!(url.starts_with("https://login.salesforce.com/services/oauth2/authorize?"));
        assert!(url.contains("client_id=test_client_id"));
        assert!(url.contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fcrm%2Foauth%2Fsalesforce%2Fcallback"
        ));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=api+refresh_token+offline_access"));
        assert!(url.contains("state=s1"));
    }

    #[test]
    fn test_extract_instance_url() {
        assert_eq!(
            extract_instance_url("https://na1.salesforce.com/services/data/v59.0/").unwrap(),
            "https://na1.salesforce.com"
        );
        assert_eq!(
            extract_instance_url("https://my-domain.my.salesforce.com/services/data/v59.0/")
                .unwrap(),
            "https://my-domain.my.salesforce.com"
        );
        assert!(extract_instance_url("https://na1.salesforce.com/other").is_err());
    }

    #[test]
    fn test_token_response_defaults_token_type() {
        let resp: SalesforceTokenResponse = serde_json::from_str(
            r#"{"access_token":"tok","instance_url":"https://na1.salesforce.com","issued_at":"1700000000000"}"#,
        )
        .unwrap();
        let tokens: TokenSet = resp.into();
        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_in, None);
        assert_eq!(tokens.instance_url.as_deref(), Some("https://na1.salesforce.com"));
    }
}
