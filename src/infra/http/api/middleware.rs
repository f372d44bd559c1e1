use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, header::AUTHORIZATION};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;

use super::error::ApiError;
use super::state::ApiState;

pub const SESSION_COOKIE: &str = "shutterbox_session";

/// Authentication gate for management routes: session cookie first, then bearer token.
pub async fn require_auth(
    State(state): State<ApiState>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = session_token(&jar, request.headers().get(AUTHORIZATION)) else {
        return ApiError::unauthorized().into_response();
    };

    let principal = match state.auth.authenticate(&token) {
        Ok(principal) => principal,
        Err(err) => return ApiError::from(err).into_response(),
    };

    request.extensions_mut().insert(principal.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(principal);
    response
}

pub(super) fn session_token(jar: &CookieJar, authorization: Option<&HeaderValue>) -> Option<String> {
    jar.get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| extract_bearer(authorization))
}

fn extract_bearer(header: Option<&HeaderValue>) -> Option<String> {
    let value = header?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}
