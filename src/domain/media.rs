//! File-type rules for stored originals.

use mime_guess::Mime;

/// Extensions accepted for originals, lower-case and without the dot.
pub const ALLOWED_EXTENSIONS: [&str; 9] = [
    "jpg", "jpeg", "png", "gif", "webp", "avif", "svg", "bmp", "tiff",
];

/// Lower-cased extension of `filename`, if it has one.
pub fn extension_of(filename: &str) -> Option<String> {
    let (stem, extension) = filename.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

/// Allow-listed extension, or `None` when the file is not an accepted image.
pub fn image_extension(filename: &str) -> Option<String> {
    extension_of(filename).filter(|extension| ALLOWED_EXTENSIONS.contains(&extension.as_str()))
}

pub fn is_image_filename(filename: &str) -> bool {
    !filename.starts_with('.') && image_extension(filename).is_some()
}

/// Content type for serving an original unchanged.
pub fn mime_for_filename(filename: &str) -> Mime {
    mime_guess::from_path(filename).first_or_octet_stream()
}
