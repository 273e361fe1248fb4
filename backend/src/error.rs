use actix_web::error::BlockingError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use oct_shared::ErrorResponse;

use crate::analysis::model::AnalysisError;
use crate::report::pdf::ReportError;
use crate::storage::upload_store::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed with {}: {}", status, self);
        }
        HttpResponse::build(status).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::MissingFile | StorageError::UnsupportedType => {
                ApiError::BadRequest(err.to_string())
            }
            StorageError::FileTooLarge => ApiError::PayloadTooLarge(err.to_string()),
            StorageError::NotFound => ApiError::NotFound(err.to_string()),
            StorageError::Io(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Decode(_) => ApiError::Unprocessable(err.to_string()),
            AnalysisError::Request(_)
            | AnalysisError::Status { .. }
            | AnalysisError::MalformedOutput(_) => ApiError::Upstream(err.to_string()),
            AnalysisError::Encode(_) | AnalysisError::Io(_) | AnalysisError::Blocking => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<BlockingError> for ApiError {
    fn from(_: BlockingError) -> Self {
        ApiError::Internal("Blocking task failed".into())
    }
}
