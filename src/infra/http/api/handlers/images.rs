use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum_extra::extract::Multipart;
use tracing::error;

use crate::application::library::{PageRequest, UploadFile};

use super::super::error::ApiError;
use super::super::models::{
    DeleteImageRequest, DeleteImageResponse, ImagesQuery, ImagesResponse, UploadResponse,
};
use super::super::state::ApiState;
use super::{json_rejection_to_api, non_blank};

const SOURCE: &str = "shutterbox::http::api::images";

pub async fn list_images(
    State(state): State<ApiState>,
    Query(query): Query<ImagesQuery>,
) -> Result<Json<ImagesResponse>, ApiError> {
    let page = state
        .library
        .list_images(
            query.path.as_deref().unwrap_or_default(),
            PageRequest::new(query.page, query.per_page),
        )
        .await?;

    Ok(Json(ImagesResponse {
        images: page.images,
        pagination: page.pagination,
    }))
}

pub async fn upload_images(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut folder = String::new();
    let mut files = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(multipart_error(err.status(), err.to_string())),
        };

        if field.name() == Some("path") {
            folder = field
                .text()
                .await
                .map_err(|err| multipart_error(err.status(), err.to_string()))?
                .trim()
                .to_string();
            continue;
        }

        let Some(original_name) = field
            .file_name()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
        else {
            continue;
        };

        let data = field
            .bytes()
            .await
            .map_err(|err| multipart_error(err.status(), err.to_string()))?;
        files.push(UploadFile {
            original_name,
            data,
        });
    }

    let files = state.library.upload(&folder, files).await?;
    Ok(Json(UploadResponse {
        success: true,
        files,
    }))
}

pub async fn delete_image(
    State(state): State<ApiState>,
    payload: Result<Json<DeleteImageRequest>, JsonRejection>,
) -> Result<Json<DeleteImageResponse>, ApiError> {
    let Json(payload) = payload.map_err(json_rejection_to_api)?;
    let filename = non_blank(payload.filename)
        .ok_or_else(|| ApiError::bad_request("Filename is required", None))?;
    if filename.contains(['/', '\\']) {
        return Err(ApiError::bad_request(
            "Invalid filename",
            Some("filename must not contain path separators".to_string()),
        ));
    }

    let outcome = state
        .library
        .delete_image(payload.path.as_deref().unwrap_or_default(), &filename)
        .await?;

    Ok(Json(DeleteImageResponse {
        success: true,
        purged: outcome.purged,
    }))
}

fn multipart_error(status: StatusCode, detail: String) -> ApiError {
    error!(
        target = SOURCE,
        status = status.as_u16(),
        error = %detail,
        "failed to read multipart payload"
    );
    match status {
        StatusCode::PAYLOAD_TOO_LARGE => ApiError::payload_too_large(),
        _ => ApiError::bad_request("Invalid multipart payload", Some(detail)),
    }
}
