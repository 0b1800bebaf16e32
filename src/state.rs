use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::gate::{CredentialCarrier, GateState};
use crate::oauth::flow::LoginFlow;
use crate::oauth::google::GoogleProvider;
use crate::oauth::line::LineProvider;
use crate::oauth::{http_client, OAuthProvider, ProviderKind};
use crate::session::{SessionTokenService, SigningKey};
use crate::store::EphemeralStore;

/// Everything a request handler needs. Built once at startup, read-only after.
#[derive(Clone)]
pub struct AppState {
    pub google: Arc<GoogleProvider>,
    pub line: Arc<LineProvider>,
    pub flow: LoginFlow,
    pub sessions: Arc<SessionTokenService>,
    pub carrier: Arc<CredentialCarrier>,
    pub session_ttl: Duration,
    pub secure_cookies: bool,
}

impl AppState {
    pub fn from_config(config: &Config, store: Arc<dyn EphemeralStore>) -> Result<Self, String> {
        let http = http_client(Duration::from_secs(config.server.http_timeout))
            .map_err(|e| format!("Failed to build HTTP client: {e}"))?;
        let key = SigningKey::new(config.server.signing_key_bytes()?);

        Ok(Self {
            google: Arc::new(GoogleProvider::new(&config.google, http.clone())),
            line: Arc::new(LineProvider::new(&config.line, http)),
            flow: LoginFlow::new(store, Duration::from_secs(config.store.state_ttl)),
            sessions: Arc::new(SessionTokenService::new(key)),
            carrier: Arc::new(CredentialCarrier {
                kind: config.credential.carrier,
                name: config.credential.name.clone(),
            }),
            session_ttl: Duration::from_secs(config.server.session_ttl),
            secure_cookies: config.server.is_https(),
        })
    }

    pub fn provider(&self, kind: ProviderKind) -> &dyn OAuthProvider {
        match kind {
            ProviderKind::Google => self.google.as_ref(),
            ProviderKind::Line => self.line.as_ref(),
        }
    }

    pub fn gate(&self) -> GateState {
        GateState {
            sessions: Arc::clone(&self.sessions),
            carrier: Arc::clone(&self.carrier),
        }
    }
}
