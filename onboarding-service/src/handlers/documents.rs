//! Document intake endpoint. Uploads happen before signup is initiated; the
//! returned references are what `POST /onboarding/signup` expects.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};

use crate::dtos::signup::DocumentUploadResponse;
use crate::services::{SignupError, StorageError};
use crate::AppState;

/// Upload one identity document.
///
/// The multipart field name selects the document kind (`aadhaar_front` or
/// `pan_image`).
#[utoipa::path(
    post,
    path = "/onboarding/documents",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Document stored", body = DocumentUploadResponse),
        (status = 400, description = "Missing file or unsupported kind", body = crate::dtos::ErrorResponse)
    ),
    tag = "Documents"
)]
pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<DocumentUploadResponse>), SignupError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SignupError::Validation(format!("Malformed multipart body: {}", e)))?
    {
        let kind = match field.name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };

        let data = field
            .bytes()
            .await
            .map_err(|e| SignupError::Validation(format!("Failed to read upload: {}", e)))?;

        if data.is_empty() {
            return Err(SignupError::Validation("Uploaded file is empty".to_string()));
        }

        let reference = state
            .documents
            .store(&kind, data.to_vec())
            .await
            .map_err(|e| match e {
                StorageError::UnsupportedKind(kind) => {
                    SignupError::Validation(format!("Unsupported document kind: {}", kind))
                }
                StorageError::Io(e) => {
                    SignupError::Internal(anyhow::anyhow!("document storage failure: {}", e))
                }
            })?;

        return Ok((
            StatusCode::CREATED,
            Json(DocumentUploadResponse { kind, reference }),
        ));
    }

    Err(SignupError::Validation(
        "Request contained no document file".to_string(),
    ))
}
