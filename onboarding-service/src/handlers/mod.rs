pub mod documents;
pub mod rm;
pub mod signup;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::dtos::ErrorResponse;
use crate::services::SignupError;

/// HTTP mapping for workflow errors: stable code in the body, status per
/// error class, `Retry-After` on cooldown rejections.
impl IntoResponse for SignupError {
    fn into_response(self) -> Response {
        let status = match &self {
            SignupError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SignupError::MissingDocument(_) => StatusCode::BAD_REQUEST,
            SignupError::DuplicateContact | SignupError::InvalidState(_) => StatusCode::CONFLICT,
            SignupError::NotFound => StatusCode::NOT_FOUND,
            SignupError::InvalidOtp | SignupError::ExpiredOtp => StatusCode::BAD_REQUEST,
            SignupError::CooldownActive { .. } => StatusCode::TOO_MANY_REQUESTS,
            SignupError::Upstream(_) => StatusCode::BAD_GATEWAY,
            SignupError::Internal(e) => {
                tracing::error!(error = %e, "Internal error in onboarding workflow");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ErrorResponse {
            error: match &self {
                // Never leak internals to clients.
                SignupError::Internal(_) => "Internal server error".to_string(),
                other => other.to_string(),
            },
            code: self.code().to_string(),
        };

        let mut response = (status, Json(body)).into_response();
        if let SignupError::CooldownActive {
            retry_after_seconds,
        } = self
        {
            if let Ok(value) = retry_after_seconds.max(0).to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: SignupError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_of(SignupError::Validation("bad".to_string())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(SignupError::MissingDocument("pan_image".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(SignupError::DuplicateContact), StatusCode::CONFLICT);
        assert_eq!(
            status_of(SignupError::InvalidState("state".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(SignupError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_of(SignupError::InvalidOtp), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(SignupError::ExpiredOtp), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(SignupError::Upstream("down".to_string())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(SignupError::Internal(anyhow::anyhow!("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_cooldown_carries_retry_after() {
        let response = SignupError::CooldownActive {
            retry_after_seconds: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("Retry-After").unwrap().to_str().unwrap(),
            "42"
        );
    }
}
