//! Indexnode-internal error categories, mapped to HTTP status codes only
//! at the handler boundary — nothing below that layer knows about
//! `StatusCode`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("missing or invalid registration headers")]
    BadHeaders,

    #[error("peer unreachable during registration ping")]
    Unreachable,

    #[error("not found")]
    NotFound,

    #[error("protocol error: {0}")]
    Protocol(#[from] fs2_core::Fs2Error),

    #[error("transient network failure: {0}")]
    Transient(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IndexError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            IndexError::BadHeaders => StatusCode::BAD_REQUEST,
            IndexError::Unreachable => StatusCode::PRECONDITION_FAILED,
            IndexError::NotFound => StatusCode::NOT_FOUND,
            IndexError::Protocol(_) => StatusCode::BAD_REQUEST,
            IndexError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            IndexError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for IndexError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if matches!(self, IndexError::Internal(_)) {
            tracing::error!(error = %self, "internal error serving request");
        }
        (status, self.to_string()).into_response()
    }
}
