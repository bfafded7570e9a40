use thiserror::Error;

/// Domain errors for the onboarding workflow.
///
/// Each variant carries a stable machine-readable code for clients; internal
/// storage and provider failures are wrapped and never surfaced verbatim.
#[derive(Error, Debug)]
pub enum SignupError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Email or phone is already registered")]
    DuplicateContact,

    #[error("Missing required document: {0}")]
    MissingDocument(String),

    #[error("Signup request not found or expired")]
    NotFound,

    #[error("Invalid OTP code")]
    InvalidOtp,

    #[error("OTP code has expired")]
    ExpiredOtp,

    #[error("Please wait before requesting another code")]
    CooldownActive { retry_after_seconds: i64 },

    #[error("{0}")]
    InvalidState(String),

    #[error("Upstream service failure: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SignupError {
    /// Stable error code surfaced to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            SignupError::Validation(_) => "VALIDATION_ERROR",
            SignupError::DuplicateContact => "DUPLICATE_CONTACT",
            SignupError::MissingDocument(_) => "MISSING_DOCUMENT",
            SignupError::NotFound => "NOT_FOUND",
            SignupError::InvalidOtp => "INVALID_OTP",
            SignupError::ExpiredOtp => "EXPIRED_OTP",
            SignupError::CooldownActive { .. } => "COOLDOWN_ACTIVE",
            SignupError::InvalidState(_) => "INVALID_STATE",
            SignupError::Upstream(_) => "UPSTREAM_ERROR",
            SignupError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
