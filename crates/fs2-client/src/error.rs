//! Client-internal error categories, kept distinct from
//! `fs2_core::Fs2Error` so the share engine, communicator, and download
//! controller can each react to the right failure class without
//! stringly-typed matching.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("share protocol error: {0}")]
    Protocol(#[from] fs2_core::Fs2Error),

    #[error("transient network failure: {0}")]
    Transient(String),

    #[error("not found")]
    NotFound,

    #[error("path escapes share root")]
    PathTraversal,

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl axum::response::IntoResponse for ClientError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status = match &self {
            ClientError::NotFound => StatusCode::NOT_FOUND,
            ClientError::PathTraversal => StatusCode::FORBIDDEN,
            ClientError::Protocol(_) => StatusCode::BAD_REQUEST,
            ClientError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            ClientError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ClientError::Internal(_) | ClientError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if matches!(self, ClientError::Internal(_)) {
            tracing::error!(error = %self, "internal error serving request");
        }
        (status, self.to_string()).into_response()
    }
}
