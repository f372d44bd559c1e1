//! Folder and original-image management behind the authenticated API.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{info, warn};

use crate::{
    domain::{
        cache_key::variant_prefix,
        error::DomainError,
        media::image_extension,
        paths::{FolderPath, base_name, validate_filename},
    },
    infra::storage::{CacheStore, OriginalStore, StorageError, StoredImage},
};

const TARGET: &str = "shutterbox::application::library";

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("folder `{0}` already exists")]
    FolderExists(String),
    #[error("no files provided")]
    NoFiles,
    #[error("no valid image files provided")]
    NoValidFiles,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderSummary {
    pub name: String,
    pub path: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedFolder {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSummary {
    pub filename: String,
    pub path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
    pub variants: usize,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub total: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagePage {
    pub images: Vec<ImageSummary>,
    pub pagination: Pagination,
}

/// A single multipart file part, already buffered.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub original_name: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub original_name: String,
    pub filename: String,
    pub path: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub removed: bool,
    pub purged: usize,
}

/// Page request with the defaults and clamping applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    fn offset(&self) -> usize {
        (self.page as usize - 1).saturating_mul(self.per_page as usize)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Clone)]
pub struct LibraryService {
    originals: Arc<OriginalStore>,
    cache: Arc<CacheStore>,
}

impl LibraryService {
    pub fn new(originals: Arc<OriginalStore>, cache: Arc<CacheStore>) -> Self {
        Self { originals, cache }
    }

    pub async fn list_folders(&self, raw_path: &str) -> Result<Vec<FolderSummary>, LibraryError> {
        let parent = FolderPath::parse(raw_path)?;
        let entries = self.originals.list_folders(&parent).await?;

        Ok(entries
            .into_iter()
            .map(|entry| FolderSummary {
                path: join(&parent, &entry.name),
                name: entry.name,
                count: entry.child_count,
            })
            .collect())
    }

    pub async fn create_folder(
        &self,
        raw_parent: &str,
        name: &str,
    ) -> Result<CreatedFolder, LibraryError> {
        let parent = FolderPath::parse(raw_parent)?;
        let folder = parent.child(name)?;

        if !self.originals.create_folder(&folder).await? {
            return Err(LibraryError::FolderExists(folder.to_string()));
        }

        info!(
            target = TARGET,
            op = "library::create_folder",
            result = "ok",
            folder = %folder,
            "Folder created"
        );
        Ok(CreatedFolder {
            name: name.to_string(),
            path: folder.to_string(),
        })
    }

    pub async fn list_images(
        &self,
        raw_path: &str,
        request: PageRequest,
    ) -> Result<ImagePage, LibraryError> {
        let folder = FolderPath::parse(raw_path)?;
        let images = self.originals.list_images(&folder).await?;
        let cached = self.cache.entries(&folder).await?;

        let total = images.len();
        let per_page = request.per_page as usize;
        let pagination = Pagination {
            page: request.page,
            per_page: request.per_page,
            total,
            total_pages: total.div_ceil(per_page),
        };

        let page: Vec<_> = images
            .into_iter()
            .skip(request.offset())
            .take(per_page)
            .collect();
        let images = self
            .originals
            .with_dimensions(&folder, page)
            .await?
            .into_iter()
            .map(|image| summarize(&folder, image, &cached))
            .collect();

        Ok(ImagePage { images, pagination })
    }

    /// Store every allow-listed file in `files`; others are skipped.
    pub async fn upload(
        &self,
        raw_path: &str,
        files: Vec<UploadFile>,
    ) -> Result<Vec<UploadedFile>, LibraryError> {
        let folder = FolderPath::parse(raw_path)?;
        if files.is_empty() {
            return Err(LibraryError::NoFiles);
        }

        let mut stored = Vec::new();
        for file in files {
            let Some(extension) = image_extension(&file.original_name) else {
                warn!(
                    target = TARGET,
                    op = "library::upload",
                    result = "skipped",
                    original_name = %file.original_name,
                    "Rejected file with unsupported extension"
                );
                continue;
            };

            let filename = self.originals.store(&folder, &extension, file.data).await?;
            stored.push(UploadedFile {
                original_name: file.original_name,
                path: folder.to_string(),
                url: render_url(&folder, &filename),
                filename,
            });
        }

        if stored.is_empty() {
            return Err(LibraryError::NoValidFiles);
        }

        info!(
            target = TARGET,
            op = "library::upload",
            result = "ok",
            folder = %folder,
            stored = stored.len(),
            "Originals uploaded"
        );
        Ok(stored)
    }

    /// Remove an original and purge its cached variants.
    ///
    /// A missing original is not an error. Purge failures are logged and
    /// reported as zero purged entries.
    pub async fn delete_image(
        &self,
        raw_path: &str,
        filename: &str,
    ) -> Result<DeleteOutcome, LibraryError> {
        let folder = FolderPath::parse(raw_path)?;
        let filename = validate_filename(filename)?;

        let removed = self.originals.delete(&folder, filename).await?;
        let purged = match self
            .cache
            .purge_by_prefix(&folder, base_name(filename))
            .await
        {
            Ok(purged) => purged,
            Err(err) => {
                warn!(
                    target = TARGET,
                    op = "library::delete_image",
                    result = "purge_failed",
                    folder = %folder,
                    filename,
                    error = %err,
                    "Failed to purge cached variants"
                );
                0
            }
        };

        info!(
            target = TARGET,
            op = "library::delete_image",
            result = "ok",
            folder = %folder,
            filename,
            removed,
            purged,
            "Original deleted"
        );
        Ok(DeleteOutcome { removed, purged })
    }
}

/// Public render URL for an original.
pub fn render_url(folder: &FolderPath, filename: &str) -> String {
    format!("/render/{}", join(folder, filename))
}

fn join(folder: &FolderPath, name: &str) -> String {
    if folder.is_root() {
        name.to_string()
    } else {
        format!("{folder}/{name}")
    }
}

fn summarize(folder: &FolderPath, image: StoredImage, cached: &[String]) -> ImageSummary {
    let prefix = variant_prefix(&image.filename);
    let variants = cached.iter().filter(|name| name.starts_with(&prefix)).count();

    ImageSummary {
        url: render_url(folder, &image.filename),
        path: folder.to_string(),
        size: image.size_bytes,
        width: image.dimensions.map(|(width, _)| width),
        height: image.dimensions.map(|(_, height)| height),
        created_at: image.created_at.and_then(format_timestamp),
        modified_at: image.modified_at.and_then(format_timestamp),
        variants,
        filename: image.filename,
    }
}

fn format_timestamp(at: SystemTime) -> Option<String> {
    OffsetDateTime::from(at).format(&Rfc3339).ok()
}
