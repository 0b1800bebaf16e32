use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use super::ApiError;
use crate::gate::Identity;
use crate::oauth::TokenRevocation;
use crate::session::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub access_token: String,
}

/// GET /api/me — claims of the verified session
pub async fn me(Extension(identity): Extension<Identity>) -> Json<Claims> {
    Json(identity.claims)
}

/// POST /api/line/revoke — revoke a Line access token
pub async fn revoke_line_token(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(body): Json<RevokeRequest>,
) -> Result<StatusCode, ApiError> {
    if body.access_token.is_empty() {
        return Err(ApiError::bad_request("access_token is required"));
    }
    state.line.revoke_token(&body.access_token).await?;
    tracing::info!(subject = %identity.subject, "Line token revoked on request");
    Ok(StatusCode::NO_CONTENT)
}
