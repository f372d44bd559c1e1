pub mod api;
mod middleware;
mod render;

pub use api::ApiState;
pub use middleware::RequestContext;

use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::application::render::RenderService;

use middleware::{log_responses, set_request_context};

/// State for the public render surface.
#[derive(Clone)]
pub struct HttpState {
    pub render: Arc<RenderService>,
}

#[derive(Clone)]
pub struct RouterState {
    pub http: HttpState,
    pub api: ApiState,
}

impl FromRef<RouterState> for HttpState {
    fn from_ref(state: &RouterState) -> Self {
        state.http.clone()
    }
}

impl FromRef<RouterState> for ApiState {
    fn from_ref(state: &RouterState) -> Self {
        state.api.clone()
    }
}

/// Full application router: public render routes, health and the management API.
pub fn build_router(state: RouterState, upload_body_limit: usize) -> Router {
    Router::new()
        .route("/render/{*path}", get(render::render_image))
        .route("/_health", get(health))
        .merge(api::build_api_router(state.clone(), upload_body_limit))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn health() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
