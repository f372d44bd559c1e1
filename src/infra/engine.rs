//! `image`-crate implementation of the transform engine port.
//!
//! Geometry is decided up front by [`plan_resize`], which is pure and knows
//! nothing about pixels. The blocking pool then decodes, applies the plan and
//! encodes.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use image::{
    DynamicImage, GenericImageView, ImageFormat, RgbaImage,
    codecs::{avif::AvifEncoder, jpeg::JpegEncoder},
    imageops::{self, FilterType},
};
use tracing::debug;

use crate::application::engine::{
    EncodeDirective, EngineError, ImageTransformEngine, ResizeDirective,
};
use crate::domain::options::{Fit, OutputFormat};

const TARGET: &str = "shutterbox::infra::engine";
const AVIF_SPEED: u8 = 8;

/// Concrete output geometry for one transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizePlan {
    /// Resize to exactly these dimensions.
    Scale { width: u32, height: u32 },
    /// Resize, then take a centred `crop_width` x `crop_height` window.
    ScaleAndCrop {
        width: u32,
        height: u32,
        crop_width: u32,
        crop_height: u32,
    },
    /// Resize, then centre on a transparent `canvas_width` x `canvas_height` canvas.
    ScaleAndPad {
        width: u32,
        height: u32,
        canvas_width: u32,
        canvas_height: u32,
    },
}

impl ResizePlan {
    /// Dimensions of the image this plan produces.
    pub fn output_size(&self) -> (u32, u32) {
        match *self {
            ResizePlan::Scale { width, height } => (width, height),
            ResizePlan::ScaleAndCrop {
                crop_width,
                crop_height,
                ..
            } => (crop_width, crop_height),
            ResizePlan::ScaleAndPad {
                canvas_width,
                canvas_height,
                ..
            } => (canvas_width, canvas_height),
        }
    }
}

/// Plan the output geometry for a `source` of `(width, height)`.
///
/// With `without_enlargement`, each requested dimension is first clamped to the
/// source dimension on that axis. A single requested dimension always keeps the
/// source aspect ratio, whatever the fit.
pub fn plan_resize(source: (u32, u32), directive: &ResizeDirective) -> ResizePlan {
    let (source_width, source_height) = (source.0.max(1), source.1.max(1));
    let clamp = |requested: u32, limit: u32| {
        if directive.without_enlargement {
            requested.min(limit)
        } else {
            requested
        }
    };

    let (width, height) = match (directive.width, directive.height) {
        (None, None) => {
            return ResizePlan::Scale {
                width: source_width,
                height: source_height,
            };
        }
        (Some(width), None) => {
            let width = clamp(width, source_width);
            return ResizePlan::Scale {
                width,
                height: scale_dimension(source_height, width, source_width),
            };
        }
        (None, Some(height)) => {
            let height = clamp(height, source_height);
            return ResizePlan::Scale {
                width: scale_dimension(source_width, height, source_height),
                height,
            };
        }
        (Some(width), Some(height)) => (clamp(width, source_width), clamp(height, source_height)),
    };

    let width_ratio = f64::from(width) / f64::from(source_width);
    let height_ratio = f64::from(height) / f64::from(source_height);
    let scaled = |ratio: f64| {
        (
            scale_by(source_width, ratio),
            scale_by(source_height, ratio),
        )
    };

    match directive.fit {
        Fit::Fill => ResizePlan::Scale { width, height },
        Fit::Inside => {
            let (scaled_width, scaled_height) = scaled(width_ratio.min(height_ratio));
            ResizePlan::Scale {
                width: scaled_width.min(width),
                height: scaled_height.min(height),
            }
        }
        Fit::Outside => {
            let (scaled_width, scaled_height) = scaled(width_ratio.max(height_ratio));
            ResizePlan::Scale {
                width: scaled_width.max(width),
                height: scaled_height.max(height),
            }
        }
        Fit::Cover => {
            let (scaled_width, scaled_height) = scaled(width_ratio.max(height_ratio));
            ResizePlan::ScaleAndCrop {
                width: scaled_width.max(width),
                height: scaled_height.max(height),
                crop_width: width,
                crop_height: height,
            }
        }
        Fit::Contain => {
            let (scaled_width, scaled_height) = scaled(width_ratio.min(height_ratio));
            ResizePlan::ScaleAndPad {
                width: scaled_width.min(width),
                height: scaled_height.min(height),
                canvas_width: width,
                canvas_height: height,
            }
        }
    }
}

fn scale_dimension(other: u32, target: u32, reference: u32) -> u32 {
    scale_by(other, f64::from(target) / f64::from(reference))
}

fn scale_by(value: u32, ratio: f64) -> u32 {
    let scaled = (f64::from(value) * ratio).round();
    if scaled < 1.0 {
        1
    } else if scaled >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        scaled as u32
    }
}

/// Raster transform engine running decode/resize/encode on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterEngine;

impl RasterEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageTransformEngine for RasterEngine {
    async fn transform(
        &self,
        source: Bytes,
        resize: Option<ResizeDirective>,
        encode: EncodeDirective,
    ) -> Result<Bytes, EngineError> {
        tokio::task::spawn_blocking(move || transform_blocking(&source, resize, encode))
            .await
            .map_err(|err| EngineError::Join(err.to_string()))?
    }
}

fn transform_blocking(
    source: &[u8],
    resize: Option<ResizeDirective>,
    encode: EncodeDirective,
) -> Result<Bytes, EngineError> {
    let image =
        image::load_from_memory(source).map_err(|err| EngineError::Decode(err.to_string()))?;

    let image = match resize {
        Some(directive) => {
            let plan = plan_resize(image.dimensions(), &directive);
            debug!(
                target = TARGET,
                op = "engine::plan",
                source_width = image.width(),
                source_height = image.height(),
                plan = ?plan,
                "Resize planned"
            );
            apply_plan(image, plan)
        }
        None => image,
    };

    encode_image(&image, encode)
}

fn apply_plan(image: DynamicImage, plan: ResizePlan) -> DynamicImage {
    match plan {
        ResizePlan::Scale { width, height } => scale(image, width, height),
        ResizePlan::ScaleAndCrop {
            width,
            height,
            crop_width,
            crop_height,
        } => {
            let scaled = scale(image, width, height);
            let x = (width - crop_width) / 2;
            let y = (height - crop_height) / 2;
            scaled.crop_imm(x, y, crop_width, crop_height)
        }
        ResizePlan::ScaleAndPad {
            width,
            height,
            canvas_width,
            canvas_height,
        } => {
            let scaled = scale(image, width, height).to_rgba8();
            let mut canvas = RgbaImage::new(canvas_width, canvas_height);
            let x = i64::from((canvas_width - width) / 2);
            let y = i64::from((canvas_height - height) / 2);
            imageops::overlay(&mut canvas, &scaled, x, y);
            DynamicImage::ImageRgba8(canvas)
        }
    }
}

fn scale(image: DynamicImage, width: u32, height: u32) -> DynamicImage {
    if image.dimensions() == (width, height) {
        image
    } else {
        image.resize_exact(width, height, FilterType::Lanczos3)
    }
}

fn encode_image(image: &DynamicImage, encode: EncodeDirective) -> Result<Bytes, EngineError> {
    let mut buffer = Vec::new();
    let encoded = match encode.format {
        OutputFormat::Jpg | OutputFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, encode.quality);
            DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)
        }
        OutputFormat::Avif => {
            let encoder =
                AvifEncoder::new_with_speed_quality(&mut buffer, AVIF_SPEED, encode.quality);
            DynamicImage::ImageRgba8(image.to_rgba8()).write_with_encoder(encoder)
        }
        OutputFormat::Png => write_as(image, &mut buffer, ImageFormat::Png),
        OutputFormat::Gif => write_as(image, &mut buffer, ImageFormat::Gif),
        // Lossless only; quality does not apply.
        OutputFormat::Webp => write_as(image, &mut buffer, ImageFormat::WebP),
    };

    encoded.map_err(|err| EngineError::Encode(err.to_string()))?;
    Ok(Bytes::from(buffer))
}

fn write_as(
    image: &DynamicImage,
    buffer: &mut Vec<u8>,
    format: ImageFormat,
) -> image::ImageResult<()> {
    DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut Cursor::new(buffer), format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn directive(width: Option<u32>, height: Option<u32>, fit: Fit) -> ResizeDirective {
        ResizeDirective {
            width,
            height,
            fit,
            without_enlargement: true,
        }
    }

    fn png(width: u32, height: u32) -> Bytes {
        let image = RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]));
        let mut buffer = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .expect("encode fixture");
        Bytes::from(buffer)
    }

    #[test]
    fn single_dimension_keeps_aspect_ratio() {
        for fit in [Fit::Cover, Fit::Contain, Fit::Fill, Fit::Inside, Fit::Outside] {
            assert_eq!(
                plan_resize((400, 200), &directive(Some(100), None, fit)),
                ResizePlan::Scale {
                    width: 100,
                    height: 50
                }
            );
            assert_eq!(
                plan_resize((400, 200), &directive(None, Some(100), fit)),
                ResizePlan::Scale {
                    width: 200,
                    height: 100
                }
            );
        }
    }

    #[test]
    fn never_enlarges_past_source() {
        let plan = plan_resize((100, 50), &directive(Some(1000), None, Fit::Cover));
        assert_eq!(plan.output_size(), (100, 50));

        let plan = plan_resize((100, 50), &directive(Some(1000), Some(1000), Fit::Inside));
        assert_eq!(plan.output_size(), (100, 50));

        let plan = plan_resize((100, 50), &directive(Some(80), Some(1000), Fit::Fill));
        assert_eq!(plan.output_size(), (80, 50));
    }

    #[test]
    fn enlargement_allowed_when_requested() {
        let plan = plan_resize(
            (100, 50),
            &ResizeDirective {
                width: Some(200),
                height: None,
                fit: Fit::Cover,
                without_enlargement: false,
            },
        );
        assert_eq!(plan.output_size(), (200, 100));
    }

    #[test]
    fn fit_policies_for_a_box() {
        let source = (400, 200);

        assert_eq!(
            plan_resize(source, &directive(Some(100), Some(100), Fit::Cover)),
            ResizePlan::ScaleAndCrop {
                width: 200,
                height: 100,
                crop_width: 100,
                crop_height: 100
            }
        );
        assert_eq!(
            plan_resize(source, &directive(Some(100), Some(100), Fit::Contain)),
            ResizePlan::ScaleAndPad {
                width: 100,
                height: 50,
                canvas_width: 100,
                canvas_height: 100
            }
        );
        assert_eq!(
            plan_resize(source, &directive(Some(100), Some(100), Fit::Fill)).output_size(),
            (100, 100)
        );
        assert_eq!(
            plan_resize(source, &directive(Some(100), Some(100), Fit::Inside)).output_size(),
            (100, 50)
        );
        assert_eq!(
            plan_resize(source, &directive(Some(100), Some(100), Fit::Outside)).output_size(),
            (200, 100)
        );
    }

    #[tokio::test]
    async fn resizes_and_reencodes() {
        let engine = RasterEngine::new();
        let output = engine
            .transform(
                png(64, 32),
                Some(directive(Some(16), Some(16), Fit::Cover)),
                EncodeDirective {
                    format: OutputFormat::Jpeg,
                    quality: 70,
                },
            )
            .await
            .expect("transform");

        assert_eq!(
            image::guess_format(&output).expect("format"),
            ImageFormat::Jpeg
        );
        let decoded = image::load_from_memory(&output).expect("decode");
        assert_eq!(decoded.dimensions(), (16, 16));
    }

    #[tokio::test]
    async fn contain_pads_with_transparency() {
        let engine = RasterEngine::new();
        let output = engine
            .transform(
                png(40, 20),
                Some(directive(Some(20), Some(20), Fit::Contain)),
                EncodeDirective {
                    format: OutputFormat::Png,
                    quality: 80,
                },
            )
            .await
            .expect("transform");

        let decoded = image::load_from_memory(&output).expect("decode").to_rgba8();
        assert_eq!(decoded.dimensions(), (20, 20));
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
        assert_eq!(decoded.get_pixel(10, 10)[3], 255);
    }

    #[tokio::test]
    async fn format_only_keeps_dimensions() {
        let engine = RasterEngine::new();
        let output = engine
            .transform(
                png(30, 10),
                None,
                EncodeDirective {
                    format: OutputFormat::Webp,
                    quality: 10,
                },
            )
            .await
            .expect("transform");

        assert_eq!(
            image::guess_format(&output).expect("format"),
            ImageFormat::WebP
        );
        assert_eq!(
            image::load_from_memory(&output).expect("decode").dimensions(),
            (30, 10)
        );
    }

    #[tokio::test]
    async fn undecodable_source_is_a_decode_error() {
        let engine = RasterEngine::new();
        let err = engine
            .transform(
                Bytes::from_static(b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>"),
                None,
                EncodeDirective {
                    format: OutputFormat::Png,
                    quality: 80,
                },
            )
            .await
            .expect_err("svg is not decodable");
        assert!(matches!(err, EngineError::Decode(_)));
    }
}
