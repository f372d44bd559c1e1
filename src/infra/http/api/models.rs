use serde::{Deserialize, Serialize};

use crate::application::library::{FolderSummary, ImageSummary, Pagination, UploadedFile};

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FolderQuery {
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FoldersResponse {
    pub folders: Vec<FolderSummary>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateFolderRequest {
    pub name: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateFolderResponse {
    pub success: bool,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImagesQuery {
    pub path: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ImagesResponse {
    pub images: Vec<ImageSummary>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteImageRequest {
    pub path: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteImageResponse {
    pub success: bool,
    pub purged: usize,
}
