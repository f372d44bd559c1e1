//! Logical folder and image paths taken from untrusted request input.
//!
//! Parsing rejects traversal instead of rewriting it: any `..` segment, a
//! backslash, or a NUL byte fails with [`DomainError::InvalidPath`]. Empty and
//! `.` segments are dropped, so `""`, `"/"` and `"."` all name the tree root.

use std::fmt;

use super::error::DomainError;

/// Slash-delimited folder path relative to a storage tree root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FolderPath(String);

impl FolderPath {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(DomainError::invalid_path("parent directory segment")),
                other => {
                    check_segment(other)?;
                    segments.push(other);
                }
            }
        }
        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// Append a validated folder name.
    pub fn child(&self, name: &str) -> Result<Self, DomainError> {
        validate_folder_name(name)?;
        if self.is_root() {
            Ok(Self(name.to_string()))
        } else {
            Ok(Self(format!("{}/{name}", self.0)))
        }
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A render request target: the folder plus the final path segment as filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePath {
    pub folder: FolderPath,
    pub filename: String,
}

impl ImagePath {
    /// Split on the last `/`; the remainder (possibly empty) is the folder.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let (folder, filename) = match raw.rsplit_once('/') {
            Some((folder, filename)) => (folder, filename),
            None => ("", raw),
        };
        if filename.is_empty() {
            return Err(DomainError::invalid_path("filename required"));
        }
        let filename = validate_filename(filename)?;
        let folder = FolderPath::parse(folder)?;
        Ok(Self {
            folder,
            filename: filename.to_string(),
        })
    }

    pub fn base_name(&self) -> &str {
        base_name(&self.filename)
    }
}

/// Reject anything that is not a single, plain path segment.
pub fn validate_filename(name: &str) -> Result<&str, DomainError> {
    match name {
        "" => Err(DomainError::invalid_path("filename required")),
        "." | ".." => Err(DomainError::invalid_path("parent directory segment")),
        _ if name.contains('/') => Err(DomainError::invalid_path("filename contains a separator")),
        _ => {
            check_segment(name)?;
            Ok(name)
        }
    }
}

/// Folder names are limited to ASCII letters, digits, `-` and `_`.
pub fn validate_folder_name(name: &str) -> Result<(), DomainError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(DomainError::InvalidFolderName {
            name: name.to_string(),
        })
    }
}

/// Filename with its final extension removed (`a.b.jpg` → `a.b`, `.hidden` → `.hidden`).
pub fn base_name(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(index) if index > 0 => &filename[..index],
        _ => filename,
    }
}

fn check_segment(segment: &str) -> Result<(), DomainError> {
    if segment.contains('\\') {
        return Err(DomainError::invalid_path("backslash in path"));
    }
    if segment.contains('\0') {
        return Err(DomainError::invalid_path("nul byte in path"));
    }
    Ok(())
}
