//! Signup workflow endpoints: initiate, per-channel verify and resend,
//! complete, status.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::dtos::signup::{
    InitiateSignupRequest, InitiateSignupResponse, ResendOtpResponse, RmResponse,
    SignupStatusResponse, VerifyOtpRequest, VerifyOtpResponse,
};
use crate::models::ChannelKind;
use crate::services::{NewSignup, SignupError};
use crate::utils::{hash_password, Password, ValidatedJson};
use crate::AppState;

/// Start an onboarding attempt and dispatch one OTP per channel.
#[utoipa::path(
    post,
    path = "/onboarding/signup",
    request_body = InitiateSignupRequest,
    responses(
        (status = 201, description = "Signup initiated, codes dispatched", body = InitiateSignupResponse),
        (status = 400, description = "Missing document reference", body = crate::dtos::ErrorResponse),
        (status = 409, description = "Contact pair already in use", body = crate::dtos::ErrorResponse),
        (status = 422, description = "Validation failure", body = crate::dtos::ErrorResponse),
        (status = 502, description = "OTP dispatch failed", body = crate::dtos::ErrorResponse)
    ),
    tag = "Signup"
)]
pub async fn initiate_signup(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<InitiateSignupRequest>,
) -> Result<(StatusCode, Json<InitiateSignupResponse>), SignupError> {
    let password_hash = hash_password(&Password::new(req.password))
        .map_err(|e| SignupError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))?;

    let initiated = state
        .signup
        .initiate(NewSignup {
            name: req.name,
            email: req.email,
            phone: req.phone,
            password_hash: password_hash.into_string(),
            document_refs: req.document_refs,
        })
        .await?;

    let echo = state.config.otp.debug_echo;
    let response = InitiateSignupResponse {
        signup_request_id: initiated.request.id,
        otp_expires_in_minutes: state.config.otp.expiry_minutes,
        mobile_otp: echo.then_some(initiated.mobile_code),
        email_otp: echo.then_some(initiated.email_code),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Verify the mobile OTP.
#[utoipa::path(
    post,
    path = "/onboarding/signup/{id}/verify-mobile",
    params(("id" = Uuid, Path, description = "Signup request ID")),
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Verification flags", body = VerifyOtpResponse),
        (status = 400, description = "Invalid or expired code", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Unknown or expired request", body = crate::dtos::ErrorResponse),
        (status = 409, description = "Request is in a terminal state", body = crate::dtos::ErrorResponse)
    ),
    tag = "Signup"
)]
pub async fn verify_mobile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<Json<VerifyOtpResponse>, SignupError> {
    verify_channel(&state, id, ChannelKind::Mobile, &req.otp).await
}

/// Verify the email OTP.
#[utoipa::path(
    post,
    path = "/onboarding/signup/{id}/verify-email",
    params(("id" = Uuid, Path, description = "Signup request ID")),
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Verification flags", body = VerifyOtpResponse),
        (status = 400, description = "Invalid or expired code", body = crate::dtos::ErrorResponse),
        (status = 404, description = "Unknown or expired request", body = crate::dtos::ErrorResponse),
        (status = 409, description = "Request is in a terminal state", body = crate::dtos::ErrorResponse)
    ),
    tag = "Signup"
)]
pub async fn verify_email(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<Json<VerifyOtpResponse>, SignupError> {
    verify_channel(&state, id, ChannelKind::Email, &req.otp).await
}

async fn verify_channel(
    state: &AppState,
    id: Uuid,
    kind: ChannelKind,
    otp: &str,
) -> Result<Json<VerifyOtpResponse>, SignupError> {
    let outcome = state.signup.verify(id, kind, otp).await?;
    Ok(Json(outcome.into()))
}

/// Resend the mobile OTP.
#[utoipa::path(
    post,
    path = "/onboarding/signup/{id}/resend-mobile",
    params(("id" = Uuid, Path, description = "Signup request ID")),
    responses(
        (status = 200, description = "Fresh code dispatched", body = ResendOtpResponse),
        (status = 404, description = "Unknown or expired request", body = crate::dtos::ErrorResponse),
        (status = 409, description = "Channel already verified or terminal state", body = crate::dtos::ErrorResponse),
        (status = 429, description = "Resend cooldown active", body = crate::dtos::ErrorResponse),
        (status = 502, description = "OTP dispatch failed", body = crate::dtos::ErrorResponse)
    ),
    tag = "Signup"
)]
pub async fn resend_mobile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResendOtpResponse>, SignupError> {
    resend_channel(&state, id, ChannelKind::Mobile).await
}

/// Resend the email OTP.
#[utoipa::path(
    post,
    path = "/onboarding/signup/{id}/resend-email",
    params(("id" = Uuid, Path, description = "Signup request ID")),
    responses(
        (status = 200, description = "Fresh code dispatched", body = ResendOtpResponse),
        (status = 404, description = "Unknown or expired request", body = crate::dtos::ErrorResponse),
        (status = 409, description = "Channel already verified or terminal state", body = crate::dtos::ErrorResponse),
        (status = 429, description = "Resend cooldown active", body = crate::dtos::ErrorResponse),
        (status = 502, description = "OTP dispatch failed", body = crate::dtos::ErrorResponse)
    ),
    tag = "Signup"
)]
pub async fn resend_email(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResendOtpResponse>, SignupError> {
    resend_channel(&state, id, ChannelKind::Email).await
}

async fn resend_channel(
    state: &AppState,
    id: Uuid,
    kind: ChannelKind,
) -> Result<Json<ResendOtpResponse>, SignupError> {
    let resent = state.signup.resend(id, kind).await?;
    Ok(Json(ResendOtpResponse {
        otp_expires_in_minutes: state.config.otp.expiry_minutes,
        otp: state.config.otp.debug_echo.then_some(resent.code),
    }))
}

/// Promote a fully verified request to an active RM.
#[utoipa::path(
    post,
    path = "/onboarding/signup/{id}/complete",
    params(("id" = Uuid, Path, description = "Signup request ID")),
    responses(
        (status = 201, description = "RM record created", body = RmResponse),
        (status = 404, description = "Unknown or expired request", body = crate::dtos::ErrorResponse),
        (status = 409, description = "Not fully verified", body = crate::dtos::ErrorResponse)
    ),
    tag = "Signup"
)]
pub async fn complete_signup(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<RmResponse>), SignupError> {
    let rm = state.signup.complete(id).await?;
    Ok((StatusCode::CREATED, Json(rm.into())))
}

/// Point-in-time snapshot of a signup request.
#[utoipa::path(
    get,
    path = "/onboarding/signup/{id}",
    params(("id" = Uuid, Path, description = "Signup request ID")),
    responses(
        (status = 200, description = "Request snapshot", body = SignupStatusResponse),
        (status = 404, description = "Unknown request", body = crate::dtos::ErrorResponse)
    ),
    tag = "Signup"
)]
pub async fn signup_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SignupStatusResponse>, SignupError> {
    let snapshot = state.signup.status(id).await?;
    Ok(Json(snapshot.into()))
}
