pub mod api;
pub mod auth;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};

use crate::gate::require_session;
use crate::oauth::flow::LoginError;
use crate::oauth::ProviderError;
use crate::session::TokenError;
use crate::state::AppState;
use crate::store::StoreError;

/// Build the full router: public login routes plus gated API routes.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/me", get(api::me))
        .route("/api/line/revoke", post(api::revoke_line_token))
        .layer(middleware::from_fn_with_state(state.gate(), require_session));

    Router::new()
        .route("/healthz", get(health))
        .route("/auth/{provider}/{purpose}", get(auth::login))
        .route("/auth/{provider}/{purpose}/callback", get(auth::callback))
        .merge(protected)
        .with_state(state)
}

/// GET /healthz
async fn health() -> &'static str {
    "ok"
}

/// Error body shared by every non-gate route: `{"ErrorMsg": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "ErrorMsg": self.message })),
        )
            .into_response()
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        tracing::warn!(op = ?err.op(), error = %err, "Identity provider call failed");
        ApiError::new(StatusCode::BAD_GATEWAY, "identity provider error")
    }
}

impl From<LoginError> for ApiError {
    fn from(err: LoginError) -> Self {
        match err {
            LoginError::StateRejected | LoginError::StateMismatch => {
                tracing::warn!(error = %err, "Callback rejected");
                ApiError::bad_request("invalid or expired login state")
            }
            LoginError::Provider(e) => e.into(),
            LoginError::Store(StoreError::Connectivity(_) | StoreError::Timeout(_)) => {
                tracing::error!(error = %err, "State store unavailable");
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "service temporarily unavailable")
            }
            LoginError::Store(_) | LoginError::Entropy(_) | LoginError::RedirectNotAllowed(_) => {
                tracing::error!(error = %err, "Login flow failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        tracing::error!(error = %err, "Session token could not be issued");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}
