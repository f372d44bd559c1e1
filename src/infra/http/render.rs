use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{
        HeaderName, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};

use crate::application::{
    error::HttpError,
    render::{RenderError, RenderOutcome},
};

use super::HttpState;

const SOURCE: &str = "infra::http::render";
const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const IMMUTABLE: &str = "public, max-age=31536000, immutable";

pub(super) async fn render_image(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    match state.render.render(&path, &query).await {
        Ok(outcome) => build_render_response(outcome),
        Err(err) => render_error_to_http(err).into_response(),
    }
}

fn build_render_response(outcome: RenderOutcome) -> Response {
    let cache_status = outcome.cache_status();
    let content_type = outcome.content_type().to_string();
    let bytes = outcome.into_bytes();
    let length = bytes.len();

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(IMMUTABLE));
    if let Some(status) = cache_status {
        headers.insert(X_CACHE, HeaderValue::from_static(status.as_str()));
    }

    response
}

fn render_error_to_http(err: RenderError) -> HttpError {
    match err {
        RenderError::InvalidPath(inner) => HttpError::from_error(
            SOURCE,
            StatusCode::BAD_REQUEST,
            inner.to_string(),
            &inner,
        ),
        RenderError::Validation(inner) => HttpError::from_error(
            SOURCE,
            StatusCode::BAD_REQUEST,
            inner.to_string(),
            &inner,
        ),
        RenderError::NotFound => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "image not found",
            "source original does not exist",
        ),
        RenderError::Transform(inner) => HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "image processing failed",
            &inner,
        ),
        RenderError::Storage(inner) => HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "image processing failed",
            &inner,
        ),
        RenderError::CacheKey(inner) => HttpError::from_error(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "image processing failed",
            &inner,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::DomainError;

    #[test]
    fn render_errors_map_to_statuses() {
        let cases = [
            (
                RenderError::InvalidPath(DomainError::invalid_path("parent directory segment")),
                StatusCode::BAD_REQUEST,
            ),
            (
                RenderError::Validation(DomainError::validation("w", "Width must be positive")),
                StatusCode::BAD_REQUEST,
            ),
            (RenderError::NotFound, StatusCode::NOT_FOUND),
            (
                RenderError::Storage(crate::infra::storage::StorageError::InvalidPath),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                RenderError::CacheKey(
                    serde_json::from_str::<u8>("not json").expect_err("invalid json"),
                ),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(render_error_to_http(err).status(), status);
        }
    }
}
