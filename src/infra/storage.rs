//! Filesystem layout for originals and cached variants.
//!
//! Two parallel trees live under one storage root: `originals/<folder>/<file>`
//! and `cache/<folder>/<variant>`. Every folder path is a validated
//! [`FolderPath`], so joining it onto a tree root cannot escape that root.

use std::fs as std_fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::config::StorageSettings;
use crate::domain::media;
use crate::domain::paths::{FolderPath, validate_filename};

/// Errors raised by the storage adapters.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error("stored file not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    fn from_io(err: io::Error) -> Self {
        if err.kind() == ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(err)
        }
    }
}

/// Which of the two parallel trees a path lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tree {
    Originals,
    Cache,
}

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    originals: PathBuf,
    cache: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>, originals_dir: &str, cache_dir: &str) -> Self {
        let root = root.into();
        Self {
            originals: root.join(originals_dir),
            cache: root.join(cache_dir),
            root,
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(
            settings.root.clone(),
            &settings.originals_dir,
            &settings.cache_dir,
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tree_root(&self, tree: Tree) -> &Path {
        match tree {
            Tree::Originals => &self.originals,
            Tree::Cache => &self.cache,
        }
    }

    /// Create both tree roots.
    pub fn ensure(&self) -> io::Result<()> {
        std_fs::create_dir_all(&self.originals)?;
        std_fs::create_dir_all(&self.cache)
    }

    /// Absolute directory for `folder` inside `tree`.
    pub fn folder_dir(&self, folder: &FolderPath, tree: Tree) -> PathBuf {
        let mut dir = self.tree_root(tree).to_path_buf();
        dir.extend(folder.segments());
        dir
    }

    /// Absolute path of a single file inside `folder`.
    pub fn file_path(
        &self,
        folder: &FolderPath,
        filename: &str,
        tree: Tree,
    ) -> Result<PathBuf, StorageError> {
        let filename = validate_filename(filename).map_err(|_| StorageError::InvalidPath)?;
        let relative = Path::new(filename);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(StorageError::InvalidPath);
        }
        Ok(self.folder_dir(folder, tree).join(relative))
    }
}

/// Sub-folder of an originals folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub name: String,
    pub child_count: usize,
}

/// Metadata for an original image on disk.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub filename: String,
    pub size_bytes: u64,
    pub created_at: Option<SystemTime>,
    pub modified_at: Option<SystemTime>,
    pub dimensions: Option<(u32, u32)>,
}

/// Read/write access to the originals tree. The render path only reads.
#[derive(Debug, Clone)]
pub struct OriginalStore {
    layout: Arc<StorageLayout>,
}

impl OriginalStore {
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        Self { layout }
    }

    /// Path of an existing original, or [`StorageError::NotFound`].
    pub async fn locate(&self, folder: &FolderPath, filename: &str) -> Result<PathBuf, StorageError> {
        let path = self.layout.file_path(folder, filename, Tree::Originals)?;
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            Ok(_) => Err(StorageError::NotFound),
            Err(err) => Err(StorageError::from_io(err)),
        }
    }

    pub async fn read(&self, folder: &FolderPath, filename: &str) -> Result<Bytes, StorageError> {
        let path = self.layout.file_path(folder, filename, Tree::Originals)?;
        read_bytes(&path).await
    }

    /// Store `data` under a fresh `<uuid>.<extension>` name and return that name.
    pub async fn store(
        &self,
        folder: &FolderPath,
        extension: &str,
        data: Bytes,
    ) -> Result<String, StorageError> {
        let dir = self.layout.folder_dir(folder, Tree::Originals);
        fs::create_dir_all(&dir).await?;

        let filename = format!("{}.{extension}", Uuid::new_v4());
        let path = self.layout.file_path(folder, &filename, Tree::Originals)?;
        fs::write(&path, &data).await?;
        Ok(filename)
    }

    /// Remove an original. Returns `false` when it did not exist.
    pub async fn delete(&self, folder: &FolderPath, filename: &str) -> Result<bool, StorageError> {
        let path = self.layout.file_path(folder, filename, Tree::Originals)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Create a folder; returns `false` if it already existed.
    pub async fn create_folder(&self, folder: &FolderPath) -> Result<bool, StorageError> {
        let dir = self.layout.folder_dir(folder, Tree::Originals);
        if fs::metadata(&dir).await.is_ok() {
            return Ok(false);
        }
        fs::create_dir_all(&dir).await?;
        Ok(true)
    }

    /// Immediate sub-folders, sorted by name. A missing folder lists as empty.
    pub async fn list_folders(&self, folder: &FolderPath) -> Result<Vec<FolderEntry>, StorageError> {
        let dir = self.layout.folder_dir(folder, Tree::Originals);
        run_blocking(move || list_folders_blocking(&dir)).await
    }

    /// Allow-listed image files, sorted by filename. A missing folder lists as empty.
    ///
    /// Only directory metadata is read; see [`OriginalStore::with_dimensions`].
    pub async fn list_images(&self, folder: &FolderPath) -> Result<Vec<StoredImage>, StorageError> {
        let dir = self.layout.folder_dir(folder, Tree::Originals);
        run_blocking(move || list_images_blocking(&dir)).await
    }

    /// Fill in pixel dimensions from each file's header. Unreadable headers stay `None`.
    pub async fn with_dimensions(
        &self,
        folder: &FolderPath,
        mut images: Vec<StoredImage>,
    ) -> Result<Vec<StoredImage>, StorageError> {
        let dir = self.layout.folder_dir(folder, Tree::Originals);
        run_blocking(move || {
            for image in &mut images {
                image.dimensions = read_dimensions(&dir.join(&image.filename));
            }
            Ok(images)
        })
        .await
    }
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Found(PathBuf),
    Missing,
}

/// Disk-backed store of derived variants, keyed by folder and variant filename.
#[derive(Debug, Clone)]
pub struct CacheStore {
    layout: Arc<StorageLayout>,
}

impl CacheStore {
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        Self { layout }
    }

    pub async fn lookup(
        &self,
        folder: &FolderPath,
        cache_filename: &str,
    ) -> Result<CacheLookup, StorageError> {
        let path = self.layout.file_path(folder, cache_filename, Tree::Cache)?;
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(CacheLookup::Found(path)),
            Ok(_) => Ok(CacheLookup::Missing),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(CacheLookup::Missing),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    pub async fn read(&self, path: &Path) -> Result<Bytes, StorageError> {
        read_bytes(path).await
    }

    /// Write a variant atomically: the bytes land in a temporary file in the
    /// target directory and are renamed into place only once fully written.
    pub async fn write(
        &self,
        folder: &FolderPath,
        cache_filename: &str,
        data: Bytes,
    ) -> Result<PathBuf, StorageError> {
        let target = self.layout.file_path(folder, cache_filename, Tree::Cache)?;
        let dir = self.layout.folder_dir(folder, Tree::Cache);

        run_blocking(move || {
            std_fs::create_dir_all(&dir)?;
            let mut staged = NamedTempFile::new_in(&dir)?;
            staged.write_all(&data)?;
            staged.flush()?;
            staged.as_file().sync_all()?;
            staged.persist(&target).map_err(|err| err.error)?;
            Ok(target)
        })
        .await
    }

    /// Remove every entry named `<base_name>_*` in `folder`; returns the number removed.
    ///
    /// Individual removal failures are logged and skipped.
    pub async fn purge_by_prefix(
        &self,
        folder: &FolderPath,
        base_name: &str,
    ) -> Result<usize, StorageError> {
        let dir = self.layout.folder_dir(folder, Tree::Cache);
        let prefix = format!("{base_name}_");

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(StorageError::Io(err)),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(&prefix) {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(
                    target = "shutterbox::infra::storage",
                    op = "cache::purge_by_prefix",
                    result = "error",
                    entry = name,
                    error = %err,
                    "Failed to remove cached variant"
                ),
            }
        }

        Ok(removed)
    }

    /// Non-hidden entry names in a cache folder. A missing folder lists as empty.
    pub async fn entries(&self, folder: &FolderPath) -> Result<Vec<String>, StorageError> {
        let dir = self.layout.folder_dir(folder, Tree::Cache);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::Io(err)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}

async fn read_bytes(path: &Path) -> Result<Bytes, StorageError> {
    fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(StorageError::from_io)
}

async fn run_blocking<T, F>(task: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| StorageError::Io(io::Error::other(err)))?
}

fn list_folders_blocking(dir: &Path) -> Result<Vec<FolderEntry>, StorageError> {
    let entries = match std_fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(StorageError::Io(err)),
    };

    let mut folders = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let child_count = std_fs::read_dir(entry.path())?
            .filter_map(Result::ok)
            .filter(|child| !child.file_name().to_string_lossy().starts_with('.'))
            .count();
        folders.push(FolderEntry { name, child_count });
    }

    folders.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(folders)
}

fn list_images_blocking(dir: &Path) -> Result<Vec<StoredImage>, StorageError> {
    let entries = match std_fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(StorageError::Io(err)),
    };

    let mut images = Vec::new();
    for entry in entries {
        let entry = entry?;
        let Ok(filename) = entry.file_name().into_string() else {
            continue;
        };
        if !media::is_image_filename(&filename) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        images.push(StoredImage {
            filename,
            size_bytes: metadata.len(),
            created_at: metadata.created().ok(),
            modified_at: metadata.modified().ok(),
            dimensions: None,
        });
    }

    images.sort_by(|left, right| left.filename.cmp(&right.filename));
    Ok(images)
}

fn read_dimensions(path: &Path) -> Option<(u32, u32)> {
    let size = imagesize::size(path).ok()?;
    Some((u32::try_from(size.width).ok()?, u32::try_from(size.height).ok()?))
}
