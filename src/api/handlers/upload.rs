use crate::AppState;
use crate::api::error::{ApiResponse, AppError};
use crate::models::Handle;
use axum::{
    Json,
    extract::{Multipart, State},
    http::HeaderMap,
};
use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

pub const UPLOAD_HANDLE_HEADER: &str = "x-upload-handle";

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    pub url: String,
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = String, description = "Multipart form: a `handle` field followed by a `file` field", content_type = "multipart/form-data"),
    params(
        ("x-upload-handle" = Option<String>, Header, description = "Upload handle (alternative to the form field)")
    ),
    responses(
        (status = 200, description = "File stored; body is wrapped in the response envelope", body = UploadResponse),
        (status = 400, description = "Malformed request or filename"),
        (status = 401, description = "Signature unknown or expired"),
        (status = 502, description = "Transfer to the object store failed")
    ),
    tag = "uploads"
)]
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<UploadResponse>>, AppError> {
    let mut handle = headers
        .get(UPLOAD_HANDLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(Handle::from);

    // If the client disconnects, axum drops this future and the guard cancels the transfer.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let mut url = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "handle" {
            let text = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            let text = text.trim();
            if !text.is_empty() {
                handle = Some(Handle::from(text));
            }
        } else if name == "file" {
            let handle = handle.clone().ok_or_else(|| {
                AppError::BadRequest("Upload handle must be sent before the file".to_string())
            })?;
            let filename = field.file_name().unwrap_or_default().to_string();

            let body_with_io_error = field.map_err(std::io::Error::other);
            let reader = StreamReader::new(body_with_io_error);

            url = Some(
                state
                    .coordinator
                    .upload(reader, &filename, &handle, &cancel)
                    .await?,
            );
        }
    }

    guard.disarm();

    let url = url.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;
    Ok(Json(ApiResponse::success(UploadResponse { url })))
}
