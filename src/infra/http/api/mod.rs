pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::infra::http::RouterState;

pub fn build_api_router(state: RouterState, upload_body_limit: usize) -> Router<RouterState> {
    let protected = Router::new()
        .route(
            "/api/folders",
            get(handlers::list_folders).post(handlers::create_folder),
        )
        .route(
            "/api/images",
            get(handlers::list_images).delete(handlers::delete_image),
        )
        .route(
            "/api/upload",
            post(handlers::upload_images).layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route("/api/logout", post(handlers::logout))
        .route_layer(axum_middleware::from_fn_with_state(
            state.api.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .route("/api/login", post(handlers::login))
        .route("/api/session", get(handlers::session))
        .merge(protected)
}
