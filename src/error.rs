// SPDX-License-Identifier: Apache-2.0
//
// Error taxonomy shared by the backends and the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed JSON, missing fields, bad content type, unknown event ids.
    #[error("{0}")]
    BadRequest(String),

    #[error("url not found")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    /// Failures surfaced to the client with a handler-chosen message.
    #[error("{0}")]
    Internal(String),

    /// open/write/ioctl/mmap failures and DRM lookups that came back empty.
    #[error("{0}")]
    Io(String),

    /// Pixel formats or device capabilities this build cannot handle.
    #[error("{0}")]
    Unsupported(String),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Error::Io(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Error::Internal(_) | Error::Io(_) | Error::Unsupported(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(err: nix::errno::Errno) -> Self {
        Error::Io(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        error_response(self.status(), &self.to_string())
    }
}

/// The `{"message": …}` error shape used on every non-2xx reply.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}
