//! Google-style provider.

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    from_config, send_json, Endpoints, OAuthProvider, ProviderCredentials, ProviderError,
    ProviderKind, ProviderOp, ProviderUserInfo,
};
use crate::config::ProviderConfig;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const DEFAULT_SCOPES: &[&str] = &["openid", "email", "profile"];

#[derive(Debug, Clone)]
pub struct GoogleProvider {
    credentials: ProviderCredentials,
    endpoints: Endpoints,
    http: reqwest::Client,
}

/// Subset of the OpenID Connect userinfo response.
#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl GoogleProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client) -> Self {
        let (credentials, endpoints) = from_config(
            config,
            DEFAULT_SCOPES,
            Endpoints {
                authorize_url: AUTHORIZE_URL.to_string(),
                token_url: TOKEN_URL.to_string(),
                profile_url: USERINFO_URL.to_string(),
                revoke_url: None,
            },
        );
        Self {
            credentials,
            endpoints,
            http,
        }
    }
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
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

    fn extra_authorize_params(&self) -> Vec<(&'static str, &'static str)> {
        vec![("include_granted_scopes", "true")]
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<ProviderUserInfo, ProviderError> {
        let request = self
            .http
            .get(&self.endpoints.profile_url)
            .bearer_auth(access_token);
        let info: GoogleUserInfo = send_json(ProviderOp::Profile, request).await?;

        let display_name = info
            .name
            .or_else(|| info.email.clone())
            .unwrap_or_default();
        Ok(ProviderUserInfo {
            external_id: info.sub,
            email: info.email,
            display_name,
        })
    }
}
