//! Render pipeline: validate a request, then serve the original, a cached
//! variant, or a freshly transformed variant.
//!
//! Decision order:
//! 1. parse path and options (pure, fails fast with 400-class errors);
//! 2. locate the original (404 when absent);
//! 3. no `w`, `h` or `fm` → pass the original through untouched;
//! 4. otherwise derive the variant name and consult the cache;
//! 5. on a miss, run the engine once per key (single-flight) and persist the
//!    result before serving it. A failed transform leaves no artifact.

mod inflight;

pub use inflight::{Flight, InFlightTransforms};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::{counter, histogram};
use mime_guess::Mime;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    application::engine::{EncodeDirective, EngineError, ImageTransformEngine, ResizeDirective},
    domain::{
        cache_key::variant_filename,
        error::DomainError,
        media::mime_for_filename,
        options::{OutputFormat, TransformOptions},
        paths::ImagePath,
    },
    infra::storage::{CacheLookup, CacheStore, OriginalStore, StorageError},
};

const TARGET: &str = "shutterbox::application::render";

/// Failure of the shared transform step. Cloneable so every coalesced waiter receives it.
#[derive(Debug, Clone, Error)]
pub enum TransformFailure {
    #[error("failed to read source image: {0}")]
    Source(Arc<StorageError>),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to persist variant: {0}")]
    Store(Arc<StorageError>),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{0}")]
    InvalidPath(DomainError),
    #[error("{0}")]
    Validation(DomainError),
    #[error("image not found")]
    NotFound,
    #[error(transparent)]
    Transform(#[from] TransformFailure),
    #[error("storage failure: {0}")]
    Storage(#[source] StorageError),
    #[error("failed to derive cache key: {0}")]
    CacheKey(#[from] serde_json::Error),
}

impl From<DomainError> for RenderError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::Validation { .. } => Self::Validation(error),
            DomainError::InvalidPath { .. } | DomainError::InvalidFolderName { .. } => {
                Self::InvalidPath(error)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RenderOutcome {
    /// The original, served byte-for-byte.
    Original { bytes: Bytes, content_type: Mime },
    /// A derived variant, either read from the cache or just produced.
    Variant {
        bytes: Bytes,
        format: OutputFormat,
        cache: CacheStatus,
    },
}

impl RenderOutcome {
    pub fn into_bytes(self) -> Bytes {
        match self {
            RenderOutcome::Original { bytes, .. } | RenderOutcome::Variant { bytes, .. } => bytes,
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            RenderOutcome::Original { content_type, .. } => content_type.as_ref(),
            RenderOutcome::Variant { format, .. } => format.mime(),
        }
    }

    /// `None` when no transform decision was made.
    pub fn cache_status(&self) -> Option<CacheStatus> {
        match self {
            RenderOutcome::Original { .. } => None,
            RenderOutcome::Variant { cache, .. } => Some(*cache),
        }
    }
}

pub struct RenderService {
    originals: Arc<OriginalStore>,
    cache: Arc<CacheStore>,
    engine: Arc<dyn ImageTransformEngine>,
    in_flight: InFlightTransforms,
}

impl RenderService {
    pub fn new(
        originals: Arc<OriginalStore>,
        cache: Arc<CacheStore>,
        engine: Arc<dyn ImageTransformEngine>,
    ) -> Self {
        Self {
            originals,
            cache,
            engine,
            in_flight: InFlightTransforms::new(),
        }
    }

    pub async fn render(
        &self,
        raw_path: &str,
        query: &HashMap<String, String>,
    ) -> Result<RenderOutcome, RenderError> {
        let target = ImagePath::parse(raw_path)?;
        let options = TransformOptions::from_query(query)?;

        match self.originals.locate(&target.folder, &target.filename).await {
            Ok(_) => {}
            Err(StorageError::NotFound | StorageError::InvalidPath) => {
                return Err(RenderError::NotFound);
            }
            Err(err) => return Err(RenderError::Storage(err)),
        }

        if !options.requires_transform() {
            let bytes = self
                .originals
                .read(&target.folder, &target.filename)
                .await
                .map_err(|err| match err {
                    StorageError::NotFound => RenderError::NotFound,
                    other => RenderError::Storage(other),
                })?;
            counter!("shutterbox_render_passthrough_total").increment(1);
            return Ok(RenderOutcome::Original {
                content_type: mime_for_filename(&target.filename),
                bytes,
            });
        }

        let variant = variant_filename(&target.filename, &options)?;
        let format = options.output_format();

        if let Some(bytes) = self.read_cached(&target, &variant).await? {
            counter!("shutterbox_render_cache_hit_total").increment(1);
            debug!(
                target = TARGET,
                op = "render::lookup",
                result = "cache_hit",
                folder = %target.folder,
                variant = %variant,
                "Variant served from cache"
            );
            return Ok(RenderOutcome::Variant {
                bytes,
                format,
                cache: CacheStatus::Hit,
            });
        }

        counter!("shutterbox_render_cache_miss_total").increment(1);
        let started_at = Instant::now();
        let key = if target.folder.is_root() {
            variant.clone()
        } else {
            format!("{}/{variant}", target.folder)
        };
        let work = transform_and_store(
            Arc::clone(&self.originals),
            Arc::clone(&self.cache),
            Arc::clone(&self.engine),
            target.clone(),
            variant.clone(),
            options,
        );

        let (result, flight) = self.in_flight.run(key, work).await;
        if flight == Flight::Follower {
            counter!("shutterbox_render_coalesced_total").increment(1);
        }

        match result {
            Ok(bytes) => {
                info!(
                    target = TARGET,
                    op = "render::transform",
                    result = "cache_miss",
                    flight = ?flight,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    folder = %target.folder,
                    variant = %variant,
                    output_bytes = bytes.len(),
                    "Variant rendered"
                );
                Ok(RenderOutcome::Variant {
                    bytes,
                    format,
                    cache: CacheStatus::Miss,
                })
            }
            Err(err) => {
                counter!("shutterbox_render_transform_error_total").increment(1);
                warn!(
                    target = TARGET,
                    op = "render::transform",
                    result = "error",
                    flight = ?flight,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    folder = %target.folder,
                    variant = %variant,
                    error = %err,
                    "Variant rendering failed"
                );
                Err(RenderError::Transform(err))
            }
        }
    }

    /// Number of transforms currently running.
    pub fn transforms_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    async fn read_cached(
        &self,
        target: &ImagePath,
        variant: &str,
    ) -> Result<Option<Bytes>, RenderError> {
        let lookup = self
            .cache
            .lookup(&target.folder, variant)
            .await
            .map_err(RenderError::Storage)?;
        let CacheLookup::Found(path) = lookup else {
            return Ok(None);
        };

        match self.cache.read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            // Purged between lookup and read; treat as a miss.
            Err(StorageError::NotFound) => Ok(None),
            Err(err) => Err(RenderError::Storage(err)),
        }
    }
}

async fn transform_and_store(
    originals: Arc<OriginalStore>,
    cache: Arc<CacheStore>,
    engine: Arc<dyn ImageTransformEngine>,
    target: ImagePath,
    variant: String,
    options: TransformOptions,
) -> Result<Bytes, TransformFailure> {
    // A flight that finished just before this one started may have published the variant.
    if let Ok(CacheLookup::Found(path)) = cache.lookup(&target.folder, &variant).await {
        if let Ok(bytes) = cache.read(&path).await {
            return Ok(bytes);
        }
    }

    let source = originals
        .read(&target.folder, &target.filename)
        .await
        .map_err(|err| TransformFailure::Source(Arc::new(err)))?;

    let resize = (options.width.is_some() || options.height.is_some()).then_some(
        ResizeDirective {
            width: options.width,
            height: options.height,
            fit: options.fit,
            without_enlargement: true,
        },
    );
    let encode = EncodeDirective {
        format: options.output_format(),
        quality: options.quality,
    };

    let started_at = Instant::now();
    let output = engine.transform(source, resize, encode).await?;
    histogram!("shutterbox_render_transform_ms").record(started_at.elapsed().as_secs_f64() * 1000.0);

    cache
        .write(&target.folder, &variant, output.clone())
        .await
        .map_err(|err| TransformFailure::Store(Arc::new(err)))?;

    Ok(output)
}
