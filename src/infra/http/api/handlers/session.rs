use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::info;

use super::super::error::ApiError;
use super::super::middleware::{SESSION_COOKIE, session_token};
use super::super::models::{LoginRequest, SessionResponse, SuccessResponse};
use super::super::state::ApiState;
use super::json_rejection_to_api;

pub async fn login(
    State(state): State<ApiState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload.map_err(json_rejection_to_api)?;
    let username = payload.username.unwrap_or_default();
    let password = payload.password.unwrap_or_default();

    let session = state.auth.login(&username, &password)?;
    info!(
        target = "shutterbox::http::api::session",
        op = "session::login",
        result = "ok",
        username = %username,
        "Operator logged in"
    );

    let cookie = Cookie::build((SESSION_COOKIE, session.token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .expires(session.expires_at)
        .build();

    Ok((jar.add(cookie), Json(SuccessResponse::ok())))
}

pub async fn session(
    State(state): State<ApiState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Json<SessionResponse> {
    let principal = session_token(&jar, headers.get(AUTHORIZATION))
        .and_then(|token| state.auth.authenticate(&token).ok());

    Json(SessionResponse {
        authenticated: principal.is_some(),
        username: principal.map(|principal| principal.username),
    })
}

pub async fn logout(
    State(state): State<ApiState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(token) = session_token(&jar, headers.get(AUTHORIZATION)) {
        state.auth.logout(&token);
    }

    let removal = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    (jar.remove(removal), Json(SuccessResponse::ok()))
}
