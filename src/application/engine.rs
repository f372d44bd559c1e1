//! Port for the pixel-level transform capability.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::options::{Fit, OutputFormat};

/// Target box and fit policy. Any missing dimension is derived from the source aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeDirective {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Fit,
    pub without_enlargement: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeDirective {
    pub format: OutputFormat,
    pub quality: u8,
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("failed to decode source image: {0}")]
    Decode(String),
    #[error("failed to encode output image: {0}")]
    Encode(String),
    #[error("transform task failed: {0}")]
    Join(String),
}

/// Produces encoded output bytes from encoded source bytes.
#[async_trait]
pub trait ImageTransformEngine: Send + Sync {
    async fn transform(
        &self,
        source: Bytes,
        resize: Option<ResizeDirective>,
        encode: EncodeDirective,
    ) -> Result<Bytes, EngineError>;
}
