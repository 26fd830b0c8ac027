use crate::services::{
    content_service::ContentError, identity::IdentityError, metadata_service::MetadataError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// An HTTP-facing error: the status to answer with and a message for the body.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// No usable caller identity on the request.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    /// The photo exists but belongs to someone else.
    pub fn forbidden(photo_id: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            format!("photo `{}` belongs to another user", photo_id),
        )
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn photo_exists(photo_id: &str) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            format!("photo `{}` already exists", photo_id),
        )
    }

    /// The photo's original is already stored; uploads cannot replace it.
    pub fn already_uploaded(photo_id: &str) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            format!("photo `{}` already has an uploaded original", photo_id),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "request failed: {}", self.message);
        }
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        AppError::internal(format!("metadata store failure: {}", err))
    }
}

impl From<ContentError> for AppError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::InvalidKey => AppError::bad_request(err.to_string()),
            ContentError::StagedNotFound(_) => AppError::not_found(err.to_string()),
            ContentError::Io(_) => AppError::internal(format!("content store failure: {}", err)),
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn content_errors_map_to_client_or_server_status() {
        assert_eq!(
            AppError::from(ContentError::InvalidKey).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(ContentError::StagedNotFound("p1".into())).status,
            StatusCode::NOT_FOUND
        );
        let io = ContentError::Io(io::Error::new(io::ErrorKind::Other, "disk full"));
        let err = AppError::from(io);
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message.contains("disk full"));
    }

    #[test]
    fn forbidden_names_the_photo() {
        let err = AppError::forbidden("p9");
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.to_string(), "403 photo `p9` belongs to another user");
    }
}
