use axum::extract::{Path, Query, State};
use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ApiError;
use crate::config::CarrierKind;
use crate::oauth::{ProviderKind, ProviderUserInfo, Purpose};
use crate::session::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: ProviderUserInfo,
}

fn parse_route(provider: &str, purpose: &str) -> Result<(ProviderKind, Purpose), ApiError> {
    let kind = ProviderKind::parse(provider)
        .ok_or_else(|| ApiError::not_found(format!("unknown provider '{provider}'")))?;
    let purpose = Purpose::parse(purpose)
        .ok_or_else(|| ApiError::not_found(format!("unknown purpose '{purpose}'")))?;
    Ok((kind, purpose))
}

/// GET /auth/{provider}/{purpose} — redirect the browser to the provider
pub async fn login(
    State(state): State<AppState>,
    Path((provider, purpose)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let (kind, purpose) = parse_route(&provider, &purpose)?;
    let client = state.provider(kind);
    let redirect_uri = client.credentials().redirect_uri(purpose).to_string();

    let request = state
        .flow
        .build_authorization_url(client, &redirect_uri)
        .await?;
    tracing::debug!(provider = %kind, %purpose, state = %request.state, "Redirecting to provider");

    let location = HeaderValue::from_str(&request.url)
        .map_err(|_| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))?;
    Ok((StatusCode::SEE_OTHER, [(LOCATION, location)]).into_response())
}

/// GET /auth/{provider}/{purpose}/callback — provider redirect back
pub async fn callback(
    State(state): State<AppState>,
    Path((provider, purpose)): Path<(String, String)>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    let (kind, purpose) = parse_route(&provider, &purpose)?;

    if let Some(error) = params.error {
        tracing::info!(
            provider = %kind,
            %error,
            description = params.error_description.as_deref().unwrap_or(""),
            "Provider reported an authorization error"
        );
        return Err(ApiError::bad_request(format!("authorization failed: {error}")));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing authorization code"))?;
    let state_value = params.state.unwrap_or_default();

    let outcome = state
        .flow
        .complete(state.provider(kind), purpose, &state_value, &code)
        .await?;

    let claims = session_claims(kind, outcome.purpose, &outcome.user);
    let token = state.sessions.issue(claims, state.session_ttl)?;

    let mut headers = HeaderMap::new();
    if state.carrier.kind == CarrierKind::Cookie {
        let cookie = session_cookie(&state, &token);
        let value = HeaderValue::from_str(&cookie)
            .map_err(|_| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))?;
        headers.insert(SET_COOKIE, value);
    }

    tracing::info!(
        provider = %kind,
        purpose = %outcome.purpose,
        scope = %outcome.tokens.scope,
        "Session issued"
    );
    Ok((
        headers,
        Json(LoginResponse {
            token,
            user: outcome.user,
        }),
    )
        .into_response())
}

fn session_claims(kind: ProviderKind, purpose: Purpose, user: &ProviderUserInfo) -> Claims {
    let mut claims = Claims::new();
    claims.insert(
        "sub".to_string(),
        Value::from(format!("{kind}:{}", user.external_id)),
    );
    if let Some(email) = &user.email {
        claims.insert("email".to_string(), Value::from(email.clone()));
    }
    claims.insert("name".to_string(), Value::from(user.display_name.clone()));
    claims.insert("provider".to_string(), Value::from(kind.as_str()));
    claims.insert("purpose".to_string(), Value::from(purpose.as_str()));
    claims
}

fn session_cookie(state: &AppState, token: &str) -> String {
    let mut cookie = format!(
        "{}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        state.carrier.name,
        state.session_ttl.as_secs()
    );
    if state.secure_cookies {
        cookie.push_str("; Secure");
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::claims::tests::id_token;
    use crate::routes::router;
    use crate::routes::tests::{body_json, test_state};
    use axum::body::Body;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn query_param(url: &str, name: &str) -> String {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    async fn start_login(app: &axum::Router, uri: &str) -> String {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[LOCATION].to_str().unwrap().to_string();
        query_param(&location, "state")
    }

    async fn mount_google(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.token",
                "token_type": "Bearer",
                "expires_in": 3599,
                "id_token": id_token(r#"{"email":"jane@example.com"}"#),
                "scope": "openid email profile"
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/profile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "g-42",
                "email": "jane@example.com",
                "name": "Jane"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_login_redirects_with_purpose_redirect_uri() {
        let app = router(test_state("https://accounts.example"));
        let response = app
            .oneshot(get("/auth/line/delete"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let location = response.headers()[LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://accounts.example/authorize?"));
        assert_eq!(
            query_param(location, "redirect_uri"),
            "https://app.example/auth/line/delete/callback"
        );
        assert_eq!(query_param(location, "client_id"), "line-client");
        assert_eq!(query_param(location, "response_type"), "code");
    }

    #[tokio::test]
    async fn test_unknown_provider_or_purpose_is_not_found() {
        let app = router(test_state("https://accounts.example"));
        for uri in ["/auth/github/sign-in", "/auth/google/logout"] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_full_login_then_protected_call() {
        let server = MockServer::start().await;
        mount_google(&server).await;
        let app = router(test_state(&server.uri()));

        let state = start_login(&app, "/auth/google/sign-in").await;
        let response = app
            .clone()
            .oneshot(get(&format!(
                "/auth/google/sign-in/callback?code=abc&state={state}"
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("access_token="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));

        let body = body_json(response).await;
        assert_eq!(body["user"]["external_id"], "g-42");
        let token = body["token"].as_str().unwrap().to_string();

        let me = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/me")
                    .header("cookie", format!("access_token={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(me.status(), StatusCode::OK);
        let claims = body_json(me).await;
        assert_eq!(claims["sub"], "google:g-42");
        assert_eq!(claims["email"], "jane@example.com");
        assert_eq!(claims["purpose"], "sign-in");
    }

    #[tokio::test]
    async fn test_replayed_callback_rejected() {
        let server = MockServer::start().await;
        mount_google(&server).await;
        let app = router(test_state(&server.uri()));

        let state = start_login(&app, "/auth/google/sign-in").await;
        let uri = format!("/auth/google/sign-in/callback?code=abc&state={state}");
        let first = app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(get(&uri)).await.unwrap();
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(second).await["ErrorMsg"],
            "invalid or expired login state"
        );
    }

    #[tokio::test]
    async fn test_state_from_other_purpose_rejected() {
        let server = MockServer::start().await;
        mount_google(&server).await;
        let app = router(test_state(&server.uri()));

        let state = start_login(&app, "/auth/google/sign-up").await;
        let response = app
            .oneshot(get(&format!(
                "/auth/google/delete/callback?code=abc&state={state}"
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_provider_error_param_rejected() {
        let app = router(test_state("https://accounts.example"));
        let response = app
            .oneshot(get(
                "/auth/line/sign-in/callback?error=access_denied&error_description=user+cancelled",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["ErrorMsg"],
            "authorization failed: access_denied"
        );
    }

    #[tokio::test]
    async fn test_exchange_failure_is_bad_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;
        let app = router(test_state(&server.uri()));

        let state = start_login(&app, "/auth/line/sign-in").await;
        let response = app
            .oneshot(get(&format!(
                "/auth/line/sign-in/callback?code=abc&state={state}"
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["ErrorMsg"], "identity provider error");
    }

    #[test]
    fn test_session_claims_shape() {
        let user = ProviderUserInfo {
            external_id: "U1".to_string(),
            email: None,
            display_name: "Brown".to_string(),
        };
        let claims = session_claims(ProviderKind::Line, Purpose::SignUp, &user);
        assert_eq!(claims["sub"], "line:U1");
        assert_eq!(claims["provider"], "line");
        assert_eq!(claims["purpose"], "sign-up");
        assert!(!claims.contains_key("email"));
    }
}
