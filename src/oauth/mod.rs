//! OAuth 2.0 authorization-code clients for the supported identity providers.
//!
//! Both providers share one capability set ([`OAuthProvider`]); token
//! revocation is a separate capability ([`TokenRevocation`]) that only the
//! Line-style client offers.

pub mod claims;
pub mod flow;
pub mod google;
pub mod line;
pub mod state;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::{ProviderConfig, RedirectUris};

/// Which outbound call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOp {
    Exchange,
    Profile,
    Revoke,
}

impl fmt::Display for ProviderOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderOp::Exchange => "token exchange",
            ProviderOp::Profile => "profile fetch",
            ProviderOp::Revoke => "token revoke",
        })
    }
}

/// Provider-boundary failures. Transport, status and decode failures stay
/// distinct; none of them is retried here.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{op} request failed: {source}")]
    Transport {
        op: ProviderOp,
        #[source]
        source: reqwest::Error,
    },
    #[error("{op} returned HTTP {status}")]
    Status {
        op: ProviderOp,
        status: StatusCode,
        body: String,
    },
    #[error("{op} response could not be decoded: {message}")]
    Decode { op: ProviderOp, message: String },
    #[error("identity token claims could not be decoded: {0}")]
    ClaimDecode(String),
    #[error("authorization URL could not be built: {0}")]
    Url(String),
}

impl ProviderError {
    /// The failing operation, if this came from an outbound call.
    pub fn op(&self) -> Option<ProviderOp> {
        match self {
            ProviderError::Transport { op, .. }
            | ProviderError::Status { op, .. }
            | ProviderError::Decode { op, .. } => Some(*op),
            ProviderError::ClaimDecode(_) | ProviderError::Url(_) => None,
        }
    }

    #[cfg(test)]
    pub fn is_exchange(&self) -> bool {
        self.op() == Some(ProviderOp::Exchange)
    }

    #[cfg(test)]
    pub fn is_profile(&self) -> bool {
        self.op() == Some(ProviderOp::Profile)
    }

    #[cfg(test)]
    pub fn is_revoke(&self) -> bool {
        self.op() == Some(ProviderOp::Revoke)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Line,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::Line => "line",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "google" => Some(ProviderKind::Google),
            "line" => Some(ProviderKind::Line),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the user is going through the provider. Each purpose has its own
/// redirect URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Purpose {
    SignIn,
    SignUp,
    Delete,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::SignIn => "sign-in",
            Purpose::SignUp => "sign-up",
            Purpose::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sign-in" => Some(Purpose::SignIn),
            "sign-up" => Some(Purpose::SignUp),
            "delete" => Some(Purpose::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client credentials for one provider, immutable after startup.
#[derive(Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uris: RedirectUris,
    pub scopes: Vec<String>,
}

impl ProviderCredentials {
    pub fn redirect_uri(&self, purpose: Purpose) -> &str {
        match purpose {
            Purpose::SignIn => &self.redirect_uris.sign_in,
            Purpose::SignUp => &self.redirect_uris.sign_up,
            Purpose::Delete => &self.redirect_uris.delete,
        }
    }

    /// The purpose whose redirect URI is exactly `redirect_uri`.
    pub fn purpose_for(&self, redirect_uri: &str) -> Option<Purpose> {
        [Purpose::SignIn, Purpose::SignUp, Purpose::Delete]
            .into_iter()
            .find(|p| self.redirect_uri(*p) == redirect_uri)
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect_uris", &self.redirect_uris)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Provider endpoints. Tests point these at a mock server.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub revoke_url: Option<String>,
}

/// Response of the provider token endpoint.
#[derive(Clone, Deserialize, Serialize, PartialEq)]
pub struct ProviderTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

impl fmt::Debug for ProviderTokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderTokenResponse")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_id_token", &self.id_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .finish()
    }
}

/// Identity derived from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUserInfo {
    pub external_id: String,
    pub email: Option<String>,
    pub display_name: String,
}

/// Capability set shared by every provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn credentials(&self) -> &ProviderCredentials;

    fn endpoints(&self) -> &Endpoints;

    fn http(&self) -> &reqwest::Client;

    /// Provider-specific query parameters appended to the authorization URL.
    fn extra_authorize_params(&self) -> Vec<(&'static str, &'static str)> {
        Vec::new()
    }

    /// Fully query-encoded authorization URL for an already-persisted state.
    fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<String, ProviderError> {
        let creds = self.credentials();
        let scope = creds.scopes.join(" ");
        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", creds.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("state", state),
        ];
        params.extend(self.extra_authorize_params());

        let base = &self.endpoints().authorize_url;
        if base.contains('?') {
            return Err(ProviderError::Url(format!(
                "authorize URL '{base}' must not carry a query string"
            )));
        }
        let query: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect();
        Ok(format!("{base}?{}", query.join("&")))
    }

    /// Exchange an authorization code at the token endpoint.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ProviderTokenResponse, ProviderError> {
        let creds = self.credentials();
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
        ];
        let request = self.http().post(&self.endpoints().token_url).form(&params);
        let tokens: ProviderTokenResponse = send_json(ProviderOp::Exchange, request).await?;

        tracing::debug!(
            provider = %self.kind(),
            token_type = %tokens.token_type,
            expires_in = tokens.expires_in,
            "Authorization code exchanged"
        );
        Ok(tokens)
    }

    /// Fetch the user's profile with a bearer access token.
    async fn fetch_user_info(&self, access_token: &str) -> Result<ProviderUserInfo, ProviderError>;
}

/// Line-style token revocation.
#[async_trait]
pub trait TokenRevocation: OAuthProvider {
    async fn revoke_token(&self, access_token: &str) -> Result<(), ProviderError>;
}

/// Build credentials and endpoints from config, falling back to public
/// endpoints and default scopes where config leaves them empty.
pub(crate) fn from_config(
    config: &ProviderConfig,
    default_scopes: &[&str],
    defaults: Endpoints,
) -> (ProviderCredentials, Endpoints) {
    let pick = |configured: &str, default: String| {
        if configured.is_empty() {
            default
        } else {
            configured.to_string()
        }
    };

    let scopes = if config.scopes.is_empty() {
        default_scopes.iter().map(|s| s.to_string()).collect()
    } else {
        config.scopes.clone()
    };

    let credentials = ProviderCredentials {
        client_id: config.client_id.clone(),
        client_secret: config.client_secret.clone(),
        redirect_uris: config.redirect_uris.clone(),
        scopes,
    };

    let endpoints = Endpoints {
        authorize_url: pick(&config.authorize_url, defaults.authorize_url),
        token_url: pick(&config.token_url, defaults.token_url),
        profile_url: pick(&config.profile_url, defaults.profile_url),
        revoke_url: match defaults.revoke_url {
            Some(default) => Some(pick(&config.revoke_url, default)),
            None => None,
        },
    };

    (credentials, endpoints)
}

/// HTTP client with a hard per-request timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Send a request and decode a JSON body from a 2xx response.
pub(crate) async fn send_json<T: DeserializeOwned>(
    op: ProviderOp,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|source| ProviderError::Transport { op, source })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| ProviderError::Transport { op, source })?;

    if !status.is_success() {
        tracing::warn!(%op, status = status.as_u16(), "Provider returned an error status");
        return Err(ProviderError::Status {
            op,
            status,
            body: truncate(&body, 512),
        });
    }

    serde_json::from_str(&body).map_err(|e| ProviderError::Decode {
        op,
        message: e.to_string(),
    })
}

pub(crate) fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::RedirectUris;

    pub(crate) fn redirect_uris(provider: &str) -> RedirectUris {
        RedirectUris {
            sign_in: "https://app.example/cb".to_string(),
            sign_up: format!("https://app.example/auth/{provider}/sign-up/callback"),
            delete: format!("https://app.example/auth/{provider}/delete/callback"),
        }
    }

    pub(crate) fn provider_config(provider: &str, mock_uri: &str) -> ProviderConfig {
        ProviderConfig {
            client_id: format!("{provider}-client"),
            client_secret: format!("{provider}-secret"),
            scopes: Vec::new(),
            redirect_uris: redirect_uris(provider),
            authorize_url: format!("{mock_uri}/authorize"),
            token_url: format!("{mock_uri}/token"),
            profile_url: format!("{mock_uri}/profile"),
            revoke_url: format!("{mock_uri}/revoke"),
        }
    }

    #[test]
    fn test_purpose_round_trip() {
        for purpose in [Purpose::SignIn, Purpose::SignUp, Purpose::Delete] {
            assert_eq!(Purpose::parse(purpose.as_str()), Some(purpose));
        }
        assert_eq!(Purpose::parse("sign_in"), None);
    }

    #[test]
    fn test_purpose_for_redirect() {
        let creds = ProviderCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_uris: redirect_uris("google"),
            scopes: vec![],
        };
        assert_eq!(creds.purpose_for("https://app.example/cb"), Some(Purpose::SignIn));
        assert_eq!(
            creds.purpose_for("https://app.example/auth/google/delete/callback"),
            Some(Purpose::Delete)
        );
        assert_eq!(creds.purpose_for("https://evil.example/cb"), None);
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = ProviderCredentials {
            client_id: "id".to_string(),
            client_secret: "top-secret".to_string(),
            redirect_uris: redirect_uris("line"),
            scopes: vec![],
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("top-secret"));
    }

    #[test]
    fn test_token_response_optional_fields() {
        let tokens: ProviderTokenResponse =
            serde_json::from_str(r#"{"access_token":"at","token_type":"Bearer","expires_in":3600}"#)
                .unwrap();
        assert_eq!(tokens.access_token, "at");
        assert!(tokens.id_token.is_none());
        assert!(tokens.refresh_token.is_none());
        assert_eq!(tokens.scope, "");
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "x".repeat(600);
        let short = truncate(&body, 512);
        assert_eq!(short.chars().count(), 513);
        assert_eq!(truncate("short", 512), "short");
    }
}
