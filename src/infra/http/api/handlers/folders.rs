use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};

use super::super::error::ApiError;
use super::super::models::{CreateFolderRequest, CreateFolderResponse, FolderQuery, FoldersResponse};
use super::super::state::ApiState;
use super::{json_rejection_to_api, non_blank};

pub async fn list_folders(
    State(state): State<ApiState>,
    Query(query): Query<FolderQuery>,
) -> Result<Json<FoldersResponse>, ApiError> {
    let folders = state
        .library
        .list_folders(query.path.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(FoldersResponse { folders }))
}

pub async fn create_folder(
    State(state): State<ApiState>,
    payload: Result<Json<CreateFolderRequest>, JsonRejection>,
) -> Result<Json<CreateFolderResponse>, ApiError> {
    let Json(payload) = payload.map_err(json_rejection_to_api)?;
    let name = non_blank(payload.name)
        .ok_or_else(|| ApiError::bad_request("Folder name is required", None))?;

    let created = state
        .library
        .create_folder(payload.path.as_deref().unwrap_or_default(), &name)
        .await?;

    Ok(Json(CreateFolderResponse {
        success: true,
        name: created.name,
        path: created.path,
    }))
}
