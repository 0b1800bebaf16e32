//! Authorization gate for protected routes.
//!
//! Per request: read the credential carrier, strip an optional `Bearer `
//! prefix, verify the session token, and either forward with the verified
//! [`Identity`] in the request extensions or short-circuit with 401.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

use crate::config::CarrierKind;
use crate::session::{Claims, SessionTokenService, TokenError};

/// The named slot a session token travels in.
#[derive(Debug, Clone)]
pub struct CredentialCarrier {
    pub kind: CarrierKind,
    pub name: String,
}

impl CredentialCarrier {
    /// Raw carrier value, if present and non-empty.
    fn extract(&self, request: &Request) -> Option<String> {
        let raw = match self.kind {
            CarrierKind::Header => request
                .headers()
                .get(self.name.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            CarrierKind::Cookie => CookieJar::from_headers(request.headers())
                .get(&self.name)
                .map(|c| c.value().trim_matches('"').to_string()),
        };
        raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }
}

/// Verified identity attached to forwarded requests.
#[derive(Debug, Clone)]
pub struct Identity {
    pub subject: String,
    pub claims: Claims,
}

/// Shared state the gate needs.
#[derive(Clone)]
pub struct GateState {
    pub sessions: Arc<SessionTokenService>,
    pub carrier: Arc<CredentialCarrier>,
}

/// Terminal rejection of the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    CredentialRequired,
    InvalidCredential,
    MalformedExpiry,
    Expired,
}

impl Rejection {
    pub fn message(&self) -> &'static str {
        match self {
            Rejection::CredentialRequired => "credential required",
            Rejection::InvalidCredential => "invalid credential",
            Rejection::MalformedExpiry => "malformed expiry",
            Rejection::Expired => "expired",
        }
    }
}

impl From<&TokenError> for Rejection {
    fn from(err: &TokenError) -> Self {
        match err {
            TokenError::Malformed(_) | TokenError::Signature => Rejection::InvalidCredential,
            TokenError::Claim(_) => Rejection::MalformedExpiry,
            TokenError::Expired { .. } => Rejection::Expired,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "ErrorMsg": self.message() })),
        )
            .into_response()
    }
}

/// Strip an optional, case-insensitive `Bearer ` prefix.
fn strip_bearer(value: &str) -> &str {
    // A trimmed `Bearer ` carries no token at all.
    if value.eq_ignore_ascii_case("bearer") {
        return "";
    }
    match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => value,
    }
}

/// Decide a single request. Separated from the middleware for testing.
pub fn authorize(
    carrier: &CredentialCarrier,
    sessions: &SessionTokenService,
    request: &Request,
) -> Result<Identity, Rejection> {
    let Some(raw) = carrier.extract(request) else {
        tracing::debug!(carrier = %carrier.name, "Rejected: no credential");
        return Err(Rejection::CredentialRequired);
    };

    let token = strip_bearer(&raw);
    if token.is_empty() {
        return Err(Rejection::CredentialRequired);
    }

    let claims = sessions.verify(token).map_err(|e| {
        tracing::warn!(kind = e.kind(), error = %e, "Rejected: session token not accepted");
        Rejection::from(&e)
    })?;

    let subject = claims
        .get("sub")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Ok(Identity { subject, claims })
}

/// Axum middleware. Use with `middleware::from_fn_with_state`.
pub async fn require_session(
    State(gate): State<GateState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    let identity = authorize(&gate.carrier, &gate.sessions, &request)?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
