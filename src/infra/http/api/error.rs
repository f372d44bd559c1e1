use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::application::{
    auth::{LoginError, SessionError},
    error::ErrorReport,
    library::LibraryError,
};
use crate::domain::error::DomainError;
use crate::infra::storage::StorageError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const INVALID_CREDENTIALS: &str = "invalid_credentials";
    pub const INVALID_PATH: &str = "invalid_path";
    pub const INVALID_FOLDER_NAME: &str = "invalid_folder_name";
    pub const DUPLICATE: &str = "duplicate";
    pub const PAYLOAD_TOO_LARGE: &str = "payload_too_large";
    pub const STORAGE: &str = "storage_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Authentication required",
            None,
        )
    }

    pub fn payload_too_large() -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            codes::PAYLOAD_TOO_LARGE,
            "Upload exceeds the request size limit",
            None,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let hint = self.hint.clone();
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        // Attach a structured report so shared logging middleware can emit rich diagnostics.
        ErrorReport::from_message(
            "infra::http::api",
            self.status,
            format!("{}: {}", self.code, hint.as_deref().unwrap_or(self.message)),
        )
        .attach(&mut response);
        response
    }
}

impl From<LoginError> for ApiError {
    fn from(err: LoginError) -> Self {
        match err {
            LoginError::MissingCredentials => {
                ApiError::bad_request("Username and password are required", None)
            }
            LoginError::InvalidCredentials => ApiError::new(
                StatusCode::UNAUTHORIZED,
                codes::INVALID_CREDENTIALS,
                "Invalid credentials",
                None,
            ),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Expired => ApiError::new(
                StatusCode::UNAUTHORIZED,
                codes::UNAUTHORIZED,
                "Session expired",
                None,
            ),
            SessionError::Missing | SessionError::Invalid => ApiError::unauthorized(),
        }
    }
}

impl From<LibraryError> for ApiError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::Domain(DomainError::InvalidFolderName { name }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_FOLDER_NAME,
                "Folder names may only contain letters, digits, '-' and '_'",
                Some(name),
            ),
            LibraryError::Domain(err @ DomainError::InvalidPath { .. }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_PATH,
                "Invalid path",
                Some(err.to_string()),
            ),
            LibraryError::Domain(err @ DomainError::Validation { .. }) => {
                ApiError::bad_request("Invalid input", Some(err.to_string()))
            }
            LibraryError::FolderExists(path) => ApiError::new(
                StatusCode::CONFLICT,
                codes::DUPLICATE,
                "Folder already exists",
                Some(path),
            ),
            LibraryError::NoFiles => ApiError::bad_request("No files uploaded", None),
            LibraryError::NoValidFiles => ApiError::bad_request(
                "No valid image files uploaded",
                Some("accepted extensions: jpg, jpeg, png, gif, webp, avif, svg, bmp, tiff".into()),
            ),
            LibraryError::Storage(StorageError::InvalidPath) => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_PATH,
                "Invalid path",
                None,
            ),
            LibraryError::Storage(err) => {
                error!(
                    target = "shutterbox::http::api",
                    error = %err,
                    "storage failure in management api"
                );
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    codes::STORAGE,
                    "Storage operation failed",
                    None,
                )
            }
        }
    }
}
