//! Error types for the fingerprint pipeline and the service around it.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Caller contract violations detected by the pipeline.
///
/// Every pipeline stage is a pure function of validated input, so none of
/// these are retryable.
#[derive(Debug, Error, PartialEq)]
pub enum FingerprintError {
    #[error("invalid audio data: {0}")]
    InvalidAudioData(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error("could not decode audio: {0}")]
    Decode(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("malformed upload: {0}")]
    Upload(#[from] MultipartError),

    #[error("missing form field `{0}`")]
    MissingField(&'static str),

    #[error("invalid song id: {0}")]
    InvalidSongId(String),

    #[error("song {0} not found")]
    NotFound(i64),

    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Fingerprint(FingerprintError::InvalidAudioData(_))
            | Error::Decode(_)
            | Error::UnsupportedFormat(_)
            | Error::Upload(_)
            | Error::MissingField(_)
            | Error::InvalidSongId(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Fingerprint(FingerprintError::Configuration(_))
            | Error::PersistenceFailure(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let detail = match &self {
            Error::NotFound(_) => "Song Not Found".to_string(),
            other => other.to_string(),
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
