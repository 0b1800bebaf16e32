//! The redirect-out / redirect-back legs of the authorization-code flow.
//!
//! Leaving: a fresh state value is stored (with TTL) and embedded in the
//! provider URL. Returning: the state is taken from the store exactly once,
//! checked against the callback route, and the code is exchanged using the
//! redirect URI recorded at the start.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::claims::extract_email;
use super::state::{self, EntropyError, STATE_BYTES};
use super::{
    OAuthProvider, ProviderError, ProviderKind, ProviderTokenResponse, ProviderUserInfo, Purpose,
};
use crate::session::unix_now;
use crate::store::{EphemeralStore, EphemeralStoreExt, StoreError};

const STATE_KEY_PREFIX: &str = "oauth_state:";

/// One pending authorization attempt, as persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationState {
    pub value: String,
    pub provider: ProviderKind,
    pub purpose: Purpose,
    pub redirect_uri: String,
    pub created_at: u64,
    pub expires_at: u64,
}

/// Where to send the browser, and the state bound to that attempt.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub tokens: ProviderTokenResponse,
    pub user: ProviderUserInfo,
    pub purpose: Purpose,
}

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("redirect URI is not configured for {0}")]
    RedirectNotAllowed(ProviderKind),
    #[error(transparent)]
    Entropy(#[from] EntropyError),
    /// Forged, replayed or expired callback.
    #[error("authorization state is unknown, expired or already used")]
    StateRejected,
    #[error("authorization state was issued for a different provider or purpose")]
    StateMismatch,
    #[error("state store failure: {0}")]
    Store(StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl From<StoreError> for LoginError {
    fn from(err: StoreError) -> Self {
        if err.is_not_found() {
            LoginError::StateRejected
        } else {
            LoginError::Store(err)
        }
    }
}

/// Drives the state handshake around a provider.
#[derive(Clone)]
pub struct LoginFlow {
    store: Arc<dyn EphemeralStore>,
    state_ttl: Duration,
}

impl LoginFlow {
    pub fn new(store: Arc<dyn EphemeralStore>, state_ttl: Duration) -> Self {
        Self { store, state_ttl }
    }

    fn key(value: &str) -> String {
        format!("{STATE_KEY_PREFIX}{value}")
    }

    /// Generate and persist a state for `redirect_uri`, then build the
    /// provider URL around it. `redirect_uri` must be one of the provider's
    /// configured purpose URIs.
    pub async fn build_authorization_url<P: OAuthProvider + ?Sized>(
        &self,
        provider: &P,
        redirect_uri: &str,
    ) -> Result<AuthorizationRequest, LoginError> {
        let purpose = provider
            .credentials()
            .purpose_for(redirect_uri)
            .ok_or(LoginError::RedirectNotAllowed(provider.kind()))?;

        let value = state::generate(STATE_BYTES)?;
        let now = unix_now();
        let record = AuthorizationState {
            value: value.clone(),
            provider: provider.kind(),
            purpose,
            redirect_uri: redirect_uri.to_string(),
            created_at: now,
            expires_at: now.saturating_add(self.state_ttl.as_secs()),
        };
        self.store
            .set_json(&Self::key(&value), &record, self.state_ttl)
            .await
            .map_err(LoginError::Store)?;

        let url = provider.authorization_url(redirect_uri, &value)?;
        tracing::info!(
            provider = %provider.kind(),
            %purpose,
            ttl_secs = self.state_ttl.as_secs(),
            "Authorization state issued"
        );
        Ok(AuthorizationRequest { url, state: value })
    }

    /// Take the state out of the store. A second call with the same value
    /// fails with [`LoginError::StateRejected`].
    pub async fn consume_state(
        &self,
        provider: ProviderKind,
        purpose: Purpose,
        value: &str,
    ) -> Result<AuthorizationState, LoginError> {
        if value.is_empty() {
            return Err(LoginError::StateRejected);
        }
        let record: AuthorizationState = self.store.take_json(&Self::key(value)).await?;

        if record.expires_at <= unix_now() {
            tracing::warn!(%provider, "Authorization state outlived its TTL");
            return Err(LoginError::StateRejected);
        }
        if record.provider != provider || record.purpose != purpose {
            tracing::warn!(
                expected_provider = %record.provider,
                expected_purpose = %record.purpose,
                %provider,
                %purpose,
                "Authorization state used on the wrong callback"
            );
            return Err(LoginError::StateMismatch);
        }
        Ok(record)
    }

    /// Validate the callback, exchange the code and derive the user.
    pub async fn complete<P: OAuthProvider + ?Sized>(
        &self,
        provider: &P,
        purpose: Purpose,
        state: &str,
        code: &str,
    ) -> Result<LoginOutcome, LoginError> {
        let record = self.consume_state(provider.kind(), purpose, state).await?;
        let tokens = provider.exchange_code(code, &record.redirect_uri).await?;
        let user = resolve_user_info(provider, &tokens).await?;

        tracing::info!(provider = %provider.kind(), %purpose, "Provider login completed");
        Ok(LoginOutcome {
            tokens,
            user,
            purpose,
        })
    }
}

/// Profile lookup, with the email taken from the identity token when the
/// profile endpoint does not return one.
pub async fn resolve_user_info<P: OAuthProvider + ?Sized>(
    provider: &P,
    tokens: &ProviderTokenResponse,
) -> Result<ProviderUserInfo, ProviderError> {
    let mut user = provider.fetch_user_info(&tokens.access_token).await?;

    if user.email.is_none() {
        if let Some(id_token) = tokens.id_token.as_deref() {
            match extract_email(id_token) {
                Ok(email) => user.email = Some(email),
                Err(e) => {
                    tracing::warn!(provider = %provider.kind(), error = %e, "No email in identity token");
                }
            }
        }
    }

    Ok(user)
}
