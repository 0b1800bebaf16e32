//! Line-style provider. The profile endpoint carries no email; it comes from
//! the identity token instead (see [`super::claims::extract_email`]).

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    from_config, send_json, truncate, Endpoints, OAuthProvider, ProviderCredentials, ProviderError,
    ProviderKind, ProviderOp, ProviderUserInfo, TokenRevocation,
};
use crate::config::ProviderConfig;

const AUTHORIZE_URL: &str = "https://access.line.me/oauth2/v2.1/authorize";
const TOKEN_URL: &str = "https://api.line.me/oauth2/v2.1/token";
const PROFILE_URL: &str = "https://api.line.me/v2/profile";
const REVOKE_URL: &str = "https://api.line.me/oauth2/v2.1/revoke";
const DEFAULT_SCOPES: &[&str] = &["profile", "openid", "email"];

#[derive(Debug, Clone)]
pub struct LineProvider {
    credentials: ProviderCredentials,
    endpoints: Endpoints,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineProfile {
    user_id: String,
    #[serde(default)]
    display_name: String,
}

impl LineProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client) -> Self {
        let (credentials, endpoints) = from_config(
            config,
            DEFAULT_SCOPES,
            Endpoints {
                authorize_url: AUTHORIZE_URL.to_string(),
                token_url: TOKEN_URL.to_string(),
                profile_url: PROFILE_URL.to_string(),
                revoke_url: Some(REVOKE_URL.to_string()),
            },
        );
        Self {
            credentials,
            endpoints,
            http,
        }
    }

    fn revoke_url(&self) -> &str {
        self.endpoints.revoke_url.as_deref().unwrap_or(REVOKE_URL)
    }
}

#[async_trait]
impl OAuthProvider for LineProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Line
    }

    fn credentials(&self) -> &ProviderCredentials {
        &self.credentials
    }

    fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn http(&self) -> &reqwest::Client {
        &self.http
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<ProviderUserInfo, ProviderError> {
        let request = self
            .http
            .get(&self.endpoints.profile_url)
            .bearer_auth(access_token);
        let profile: LineProfile = send_json(ProviderOp::Profile, request).await?;

        Ok(ProviderUserInfo {
            external_id: profile.user_id,
            email: None,
            display_name: profile.display_name,
        })
    }
}

#[async_trait]
impl TokenRevocation for LineProvider {
    async fn revoke_token(&self, access_token: &str) -> Result<(), ProviderError> {
        let op = ProviderOp::Revoke;
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("access_token", access_token),
        ];
        let response = self
            .http
            .post(self.revoke_url())
            .form(&params)
            .send()
            .await
            .map_err(|source| ProviderError::Transport { op, source })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response
                .text()
                .await
                .map_err(|source| ProviderError::Transport { op, source })?;
            tracing::warn!(status = status.as_u16(), "Line token revoke rejected");
            return Err(ProviderError::Status {
                op,
                status,
                body: truncate(&body, 512),
            });
        }

        tracing::info!("Line access token revoked");
        Ok(())
    }
}
