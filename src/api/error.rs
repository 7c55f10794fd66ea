use crate::error::{BrokerError, ErrorKind};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Application-level result codes carried in every response envelope.
pub mod codes {
    pub const SUCCESS: i32 = 200;
    pub const SIGNATURE_EXPIRED: i32 = 10002;
    pub const PARAMS_ERROR: i32 = 40000;
    pub const FILE_UPLOAD_ERROR: i32 = 40001;
    pub const SYSTEM_ERROR: i32 = 50000;
}

/// Uniform response envelope
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: codes::SUCCESS,
            message: "OK".to_string(),
            data: Some(data),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Bad Request: {0}")]
    BadRequest(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, i32) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, codes::PARAMS_ERROR),
            AppError::Broker(e) => match e.kind() {
                ErrorKind::InvalidRequest => (StatusCode::BAD_REQUEST, codes::PARAMS_ERROR),
                ErrorKind::SignatureExpired => (StatusCode::UNAUTHORIZED, codes::SIGNATURE_EXPIRED),
                ErrorKind::DependencyUnavailable => {
                    (StatusCode::SERVICE_UNAVAILABLE, codes::SYSTEM_ERROR)
                }
                ErrorKind::StagingFailed => {
                    (StatusCode::INTERNAL_SERVER_ERROR, codes::FILE_UPLOAD_ERROR)
                }
                ErrorKind::TransferFailed => (StatusCode::BAD_GATEWAY, codes::FILE_UPLOAD_ERROR),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Broker(e) => {
                match e.kind() {
                    ErrorKind::InvalidRequest | ErrorKind::SignatureExpired => {
                        tracing::debug!("Rejected request: {}", e)
                    }
                    _ => tracing::error!("{} error: {:?}", e.kind().as_str(), e),
                }
                e.to_string()
            }
        };

        let body = Json(ApiResponse::<()> {
            code,
            message,
            data: None,
        });

        (status, body).into_response()
    }
}
