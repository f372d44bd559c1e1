//! Management API handlers, one module per resource.

mod folders;
mod images;
mod session;

pub use folders::*;
pub use images::*;
pub use session::*;

use axum::extract::rejection::JsonRejection;

use super::error::ApiError;

fn json_rejection_to_api(err: JsonRejection) -> ApiError {
    ApiError::bad_request("Invalid JSON body", Some(err.body_text()))
}

/// Treat blank strings the same as missing fields.
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}
