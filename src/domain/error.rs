use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("invalid path: {reason}")]
    InvalidPath { reason: &'static str },
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: &'static str,
    },
    #[error("invalid folder name `{name}`")]
    InvalidFolderName { name: String },
}

impl DomainError {
    pub fn invalid_path(reason: &'static str) -> Self {
        Self::InvalidPath { reason }
    }

    pub fn validation(field: &'static str, message: &'static str) -> Self {
        Self::Validation { field, message }
    }
}
