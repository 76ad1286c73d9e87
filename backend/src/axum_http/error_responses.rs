use application::usecases::{
    booking_actions::BookingActionError, document_assembler::DocumentError,
    signing_session::SigningError, status_reconciler::ReconcileError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// An upstream service failed; the client may try again.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (message, retryable) = match self {
            AppError::BadRequest(msg) | AppError::NotFound(msg) | AppError::Conflict(msg) => {
                (msg, None)
            }
            AppError::Upstream(msg) => (msg, Some(true)),
            AppError::Internal(err) => {
                error!(error = ?err, "http: internal error");
                // Don't leak internal error detail to client
                ("Internal server error".to_string(), None)
            }
        };

        let body = Json(ErrorResponse {
            code: status.as_u16(),
            message,
            retryable,
        });

        (status, body).into_response()
    }
}

impl From<BookingActionError> for AppError {
    fn from(err: BookingActionError) -> Self {
        let message = err.to_string();
        match err {
            BookingActionError::InvalidTransition { .. } => AppError::Conflict(message),
            BookingActionError::ReasonConfirmationRequired => AppError::BadRequest(message),
            BookingActionError::NotFound(_) => AppError::NotFound(message),
            BookingActionError::TransportFailure(_) => AppError::Upstream(message),
        }
    }
}

impl From<SigningError> for AppError {
    fn from(err: SigningError) -> Self {
        let message = err.to_string();
        match err {
            SigningError::NothingToSign { .. }
            | SigningError::SessionBusy(_)
            | SigningError::NoActiveSession => AppError::Conflict(message),
            SigningError::InvalidReturnUrl(_) => AppError::BadRequest(message),
            SigningError::SessionCreationFailed(_) => AppError::Upstream(message),
        }
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        let message = err.to_string();
        match err {
            DocumentError::DocumentUnavailable(_) => AppError::NotFound(message),
            DocumentError::FetchFailed(_) => AppError::Upstream(message),
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        let message = err.to_string();
        match err {
            ReconcileError::BookingNotFound(_) => AppError::NotFound(message),
            ReconcileError::Unavailable { .. } | ReconcileError::Aborted => {
                AppError::Upstream(message)
            }
        }
    }
}
