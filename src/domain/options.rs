//! Transform options parsed from render query strings.
//!
//! Parsing checks fields in a fixed order (`w`, `h`, `q`, `fit`, `fm`) and
//! reports only the first violation. Defaults apply when a key is absent; a
//! key that is present but malformed is always an error.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::error::DomainError;

pub const MAX_DIMENSION: u32 = 8000;
pub const DEFAULT_QUALITY: u8 = 80;

/// Geometric policy for reconciling the source aspect ratio with a target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    #[default]
    Cover,
    Contain,
    Fill,
    Inside,
    Outside,
}

impl Fit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fit::Cover => "cover",
            Fit::Contain => "contain",
            Fit::Fill => "fill",
            Fit::Inside => "inside",
            Fit::Outside => "outside",
        }
    }
}

impl FromStr for Fit {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "cover" => Ok(Fit::Cover),
            "contain" => Ok(Fit::Contain),
            "fill" => Ok(Fit::Fill),
            "inside" => Ok(Fit::Inside),
            "outside" => Ok(Fit::Outside),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Fit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encodings a variant can be produced in.
///
/// `Jpg` and `Jpeg` encode identically but stay distinct so the requested
/// spelling survives into the variant file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Webp,
    Avif,
    Jpg,
    Jpeg,
    Png,
    Gif,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Jpg => "jpg",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Gif => "gif",
        }
    }

    /// File extension used for cached variants.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn mime(&self) -> &'static str {
        match self {
            OutputFormat::Webp => "image/webp",
            OutputFormat::Avif => "image/avif",
            OutputFormat::Jpg | OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Gif => "image/gif",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "webp" => Ok(OutputFormat::Webp),
            "avif" => Ok(OutputFormat::Avif),
            "jpg" => Ok(OutputFormat::Jpg),
            "jpeg" => Ok(OutputFormat::Jpeg),
            "png" => Ok(OutputFormat::Png),
            "gif" => Ok(OutputFormat::Gif),
            _ => Err(()),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical, validated transform request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransformOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: u8,
    pub fit: Fit,
    pub format: Option<OutputFormat>,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            quality: DEFAULT_QUALITY,
            fit: Fit::default(),
            format: None,
        }
    }
}

impl TransformOptions {
    /// Parse raw query parameters (`w`, `h`, `q`, `fit`, `fm`). Unknown keys are ignored.
    pub fn from_query(params: &HashMap<String, String>) -> Result<Self, DomainError> {
        let width = params
            .get("w")
            .map(|raw| parse_dimension(raw, &WIDTH_RULES))
            .transpose()?;
        let height = params
            .get("h")
            .map(|raw| parse_dimension(raw, &HEIGHT_RULES))
            .transpose()?;
        let quality = params
            .get("q")
            .map(|raw| parse_quality(raw))
            .transpose()?
            .unwrap_or(DEFAULT_QUALITY);
        let fit = params
            .get("fit")
            .map(|raw| {
                raw.parse::<Fit>().map_err(|_| {
                    DomainError::validation(
                        "fit",
                        "Invalid fit (expected cover, contain, fill, inside or outside)",
                    )
                })
            })
            .transpose()?
            .unwrap_or_default();
        let format = params
            .get("fm")
            .map(|raw| {
                raw.parse::<OutputFormat>().map_err(|_| {
                    DomainError::validation(
                        "fm",
                        "Invalid format (expected webp, avif, jpg, jpeg, png or gif)",
                    )
                })
            })
            .transpose()?;

        Ok(Self {
            width,
            height,
            quality,
            fit,
            format,
        })
    }

    /// Quality and fit alone never trigger a transform.
    pub fn requires_transform(&self) -> bool {
        self.width.is_some() || self.height.is_some() || self.format.is_some()
    }

    pub fn output_format(&self) -> OutputFormat {
        self.format.unwrap_or(OutputFormat::Webp)
    }
}

struct DimensionRules {
    field: &'static str,
    not_integer: &'static str,
    not_positive: &'static str,
    too_large: &'static str,
}

const WIDTH_RULES: DimensionRules = DimensionRules {
    field: "w",
    not_integer: "Width must be an integer",
    not_positive: "Width must be positive",
    too_large: "Width too large (max 8000)",
};

const HEIGHT_RULES: DimensionRules = DimensionRules {
    field: "h",
    not_integer: "Height must be an integer",
    not_positive: "Height must be positive",
    too_large: "Height too large (max 8000)",
};

fn parse_dimension(raw: &str, rules: &DimensionRules) -> Result<u32, DomainError> {
    let value = parse_integer(raw)
        .ok_or_else(|| DomainError::validation(rules.field, rules.not_integer))?;
    if value < 1 {
        return Err(DomainError::validation(rules.field, rules.not_positive));
    }
    if value > i64::from(MAX_DIMENSION) {
        return Err(DomainError::validation(rules.field, rules.too_large));
    }
    u32::try_from(value).map_err(|_| DomainError::validation(rules.field, rules.too_large))
}

fn parse_quality(raw: &str) -> Result<u8, DomainError> {
    const RANGE: &str = "Quality must be between 1 and 100";

    let value = parse_integer(raw)
        .ok_or_else(|| DomainError::validation("q", "Quality must be an integer"))?;
    if !(1..=100).contains(&value) {
        return Err(DomainError::validation("q", RANGE));
    }
    u8::try_from(value).map_err(|_| DomainError::validation("q", RANGE))
}

/// Accepts integral numeric strings, including forms like `100.0` or ` 42 `.
fn parse_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return Some(value);
    }

    let value = trimmed.parse::<f64>().ok()?;
    if !value.is_finite() || value.fract() != 0.0 {
        return None;
    }
    if value >= i64::MAX as f64 {
        return Some(i64::MAX);
    }
    if value <= i64::MIN as f64 {
        return Some(i64::MIN);
    }
    Some(value as i64)
}
