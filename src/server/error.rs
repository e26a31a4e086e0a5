//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<Response, ApiError>`. An `ApiError` can
//! only be produced before response headers are sent; failures after that
//! point end the body instead.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Path outside the catalog, relative, or containing `..`.
    #[error("forbidden: {}", .0.display())]
    Forbidden(PathBuf),

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("range not satisfiable (size {size})")]
    RangeNotSatisfiable { size: u64 },

    /// The file needs transcoding and transcoding is disabled.
    #[error("unsupported media: {}", .0.display())]
    Unsupported(PathBuf),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::Unsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::RangeNotSatisfiable { .. } => "range_not_satisfiable",
            ApiError::Unsupported(_) => "unsupported_media",
            ApiError::Internal(_) => "internal_error",
        }
    }

    /// Map an I/O error on `path`: a missing file is 404, anything else 500.
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound(path.into())
        } else {
            ApiError::Internal(format!("{}: {}", path.into().display(), err))
        }
    }
}

impl From<homestream_av::Error> for ApiError {
    fn from(e: homestream_av::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Server error in handler");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }

        let body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let ApiError::RangeNotSatisfiable { size } = self {
            if let Ok(value) = format!("bytes */{size}").parse() {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        let p = || PathBuf::from("/m/a.mkv");
        assert_eq!(ApiError::Forbidden(p()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound(p()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Unsupported(p()).status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            ApiError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn range_error_carries_content_range() {
        let response = ApiError::RangeNotSatisfiable { size: 1000 }.into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */1000"
        );
    }

    #[test]
    fn io_not_found_maps_to_404() {
        let err = ApiError::from_io(
            "/m/a.mkv",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, ApiError::NotFound(_)));

        let err = ApiError::from_io(
            "/m/a.mkv",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
