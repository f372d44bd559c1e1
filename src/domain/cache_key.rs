//! Deterministic names for cached variants.
//!
//! The digest covers exactly `w`, `h`, `q`, `fit` and `fm`, serialised in that
//! order as compact JSON with absent optional fields omitted. The field order
//! is part of the on-disk format: changing it orphans every existing variant.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::options::{Fit, OutputFormat, TransformOptions};
use super::paths::base_name;

pub const DIGEST_LEN: usize = 12;

/// Field order here is the key order of the hashed JSON.
#[derive(Serialize)]
struct CanonicalOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    w: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    h: Option<u32>,
    q: u8,
    fit: Fit,
    #[serde(skip_serializing_if = "Option::is_none")]
    fm: Option<OutputFormat>,
}

impl From<&TransformOptions> for CanonicalOptions {
    fn from(options: &TransformOptions) -> Self {
        Self {
            w: options.width,
            h: options.height,
            q: options.quality,
            fit: options.fit,
            fm: options.format,
        }
    }
}

pub fn canonical_options(options: &TransformOptions) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&CanonicalOptions::from(options))
}

/// Twelve lowercase hex characters identifying an option set.
pub fn options_digest(options: &TransformOptions) -> Result<String, serde_json::Error> {
    let digest = Sha256::digest(canonical_options(options)?);
    let mut encoded = hex::encode(digest);
    encoded.truncate(DIGEST_LEN);
    Ok(encoded)
}

/// `{baseName}_{digest}.{format}`, with the format defaulting to webp.
pub fn variant_filename(
    filename: &str,
    options: &TransformOptions,
) -> Result<String, serde_json::Error> {
    Ok(format!(
        "{}{}.{}",
        variant_prefix(filename),
        options_digest(options)?,
        options.output_format().extension()
    ))
}

/// Prefix shared by every variant of `filename`.
pub fn variant_prefix(filename: &str) -> String {
    format!("{}_", base_name(filename))
}
