use axum::{
    Json,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{FormRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::{ErrorKind, FlashError, ReleaseError};

/// Failure body shared by every endpoint: `{"success": false, "error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn forbidden() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "Access is only allowed from the local host.",
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::ResourceBusy => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::RemoteFetchFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<FlashError> for ApiError {
    fn from(e: FlashError) -> Self {
        Self::new(status_for(e.kind()), e.to_string())
    }
}

impl From<ReleaseError> for ApiError {
    fn from(e: ReleaseError) -> Self {
        Self::new(status_for(e.kind()), e.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(e: MultipartRejection) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

impl From<FormRejection> for ApiError {
    fn from(e: FormRejection) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::new(e.status(), e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = %self.status, error = %self.message, "Request failed");
        }
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(
            ApiError::from(FlashError::JobAlreadyRunning).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(FlashError::NoFirmware).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(FlashError::BoardNotFound {
                version: "v1".into(),
                board: "goE".into(),
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ReleaseError::DownloadInProgress).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ReleaseError::InvalidVersion("v/".into())).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn release_failures_inside_flash_errors_keep_their_class() {
        let err = FlashError::from(ReleaseError::Fetch {
            version: "v1".into(),
            source: anyhow::anyhow!("connection reset"),
        });
        let api = ApiError::from(err);
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(api.message().contains("connection reset"));
    }
}
