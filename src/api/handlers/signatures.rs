use crate::AppState;
use crate::api::error::{ApiResponse, AppError};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct SignatureRequest {
    /// Logical category of the upload: "image", "video" or "file"
    pub file_type: String,
}

#[derive(Serialize, ToSchema)]
pub struct SignatureResponse {
    /// Opaque handle to present with the upload
    pub handle: String,
    pub expires_in_secs: u64,
}

#[utoipa::path(
    post,
    path = "/signatures",
    request_body = SignatureRequest,
    responses(
        (status = 200, description = "Signature issued; body is wrapped in the response envelope", body = SignatureResponse),
        (status = 400, description = "Unknown file type"),
        (status = 503, description = "Signer or signature cache unavailable")
    ),
    tag = "uploads"
)]
pub async fn issue_signature(
    State(state): State<AppState>,
    Json(req): Json<SignatureRequest>,
) -> Result<Json<ApiResponse<SignatureResponse>>, AppError> {
    let handle = state.issuer.issue_for_category(&req.file_type).await?;

    Ok(Json(ApiResponse::success(SignatureResponse {
        handle: handle.to_string(),
        expires_in_secs: state.config.signature_ttl.as_secs(),
    })))
}
