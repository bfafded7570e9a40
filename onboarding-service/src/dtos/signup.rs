//! Request/response DTOs for the onboarding endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{RelationshipManager, RmStatus, SignupStatus};
use crate::services::signup::{ChannelSnapshot, StatusSnapshot, VerificationOutcome};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct InitiateSignupRequest {
    #[validate(length(min = 2, max = 100, message = "Name must be 2-100 characters"))]
    pub name: String,

    #[validate(email(message = "Invalid email address"))]
    pub email: String,

    #[validate(custom(function = validate_phone))]
    pub phone: String,

    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub password: String,

    /// References returned by the document upload endpoint, keyed by kind.
    pub document_refs: BTreeMap<String, String>,
}

/// Phone numbers are 10-15 digits with an optional leading `+`.
fn validate_phone(phone: &str) -> Result<(), validator::ValidationError> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits.len() >= 10 && digits.len() <= 15 && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        let mut err = validator::ValidationError::new("phone");
        err.message = Some("Phone must be 10-15 digits, optionally prefixed with +".into());
        Err(err)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InitiateSignupResponse {
    pub signup_request_id: Uuid,
    pub otp_expires_in_minutes: i64,
    /// Present only when OTP debug echo is enabled (dev environments).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile_otp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_otp: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyOtpRequest {
    #[validate(length(equal = 6, message = "OTP must be 6 digits"))]
    pub otp: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyOtpResponse {
    pub mobile_verified: bool,
    pub email_verified: bool,
    pub both_verified: bool,
}

impl From<VerificationOutcome> for VerifyOtpResponse {
    fn from(outcome: VerificationOutcome) -> Self {
        Self {
            mobile_verified: outcome.mobile_verified,
            email_verified: outcome.email_verified,
            both_verified: outcome.both_verified,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResendOtpResponse {
    pub otp_expires_in_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChannelStatusResponse {
    pub verified: bool,
    pub otp_expires_in_seconds: i64,
    pub resend_available_in_seconds: i64,
    pub attempts: i32,
}

impl From<ChannelSnapshot> for ChannelStatusResponse {
    fn from(snapshot: ChannelSnapshot) -> Self {
        Self {
            verified: snapshot.verified,
            otp_expires_in_seconds: snapshot.otp_expires_in_seconds,
            resend_available_in_seconds: snapshot.resend_available_in_seconds,
            attempts: snapshot.attempts,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SignupStatusResponse {
    pub signup_request_id: Uuid,
    pub status: SignupStatus,
    pub mobile: ChannelStatusResponse,
    pub email: ChannelStatusResponse,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<StatusSnapshot> for SignupStatusResponse {
    fn from(snapshot: StatusSnapshot) -> Self {
        Self {
            signup_request_id: snapshot.id,
            status: snapshot.status,
            mobile: snapshot.mobile.into(),
            email: snapshot.email.into(),
            created_at: snapshot.created_at,
            completed_at: snapshot.completed_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RmResponse {
    pub id: Uuid,
    pub rm_code: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub status: RmStatus,
    pub created_at: DateTime<Utc>,
}

impl From<RelationshipManager> for RmResponse {
    fn from(rm: RelationshipManager) -> Self {
        Self {
            id: rm.id,
            rm_code: rm.rm_code,
            name: rm.name,
            email: rm.email,
            phone: rm.phone,
            status: rm.status,
            created_at: rm.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ValidateRmCodeResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rm_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DocumentUploadResponse {
    pub kind: String,
    pub reference: String,
}
