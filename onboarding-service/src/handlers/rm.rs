//! RM directory endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::dtos::signup::ValidateRmCodeResponse;
use crate::models::RmStatus;
use crate::services::SignupError;
use crate::AppState;

/// Check whether an RM referral code belongs to an active RM.
///
/// Always answers 200; unknown and inactive codes are reported as invalid
/// rather than as errors, so callers can surface the result inline.
#[utoipa::path(
    get,
    path = "/onboarding/rms/validate-code/{code}",
    params(("code" = String, Path, description = "RM referral code, e.g. RM-7KQ2M4XP")),
    responses(
        (status = 200, description = "Validation result", body = ValidateRmCodeResponse)
    ),
    tag = "RM Directory"
)]
pub async fn validate_rm_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ValidateRmCodeResponse>, SignupError> {
    let rm = state.registrar.find_by_code(&code).await?;

    let response = match rm {
        Some(rm) if rm.status == RmStatus::Active => ValidateRmCodeResponse {
            valid: true,
            rm_name: Some(rm.name),
        },
        _ => ValidateRmCodeResponse {
            valid: false,
            rm_name: None,
        },
    };

    Ok(Json(response))
}
