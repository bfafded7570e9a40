pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    middleware::from_fn,
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::OnboardingConfig;
use crate::services::{DocumentStorage, RmRegistrar, SignupService};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::documents::upload_document,
        handlers::signup::initiate_signup,
        handlers::signup::verify_mobile,
        handlers::signup::verify_email,
        handlers::signup::resend_mobile,
        handlers::signup::resend_email,
        handlers::signup::complete_signup,
        handlers::signup::signup_status,
        handlers::rm::validate_rm_code,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::signup::InitiateSignupRequest,
            dtos::signup::InitiateSignupResponse,
            dtos::signup::VerifyOtpRequest,
            dtos::signup::VerifyOtpResponse,
            dtos::signup::ResendOtpResponse,
            dtos::signup::ChannelStatusResponse,
            dtos::signup::SignupStatusResponse,
            dtos::signup::RmResponse,
            dtos::signup::ValidateRmCodeResponse,
            dtos::signup::DocumentUploadResponse,
            models::SignupStatus,
            models::RmStatus,
        )
    ),
    tags(
        (name = "Documents", description = "Identity document intake"),
        (name = "Signup", description = "OTP-gated RM onboarding workflow"),
        (name = "RM Directory", description = "Relationship manager lookups"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: OnboardingConfig,
    pub signup: Arc<SignupService>,
    pub registrar: RmRegistrar,
    pub documents: Arc<dyn DocumentStorage>,
    pub pool: Option<sqlx::PgPool>,
}

pub fn build_router(state: AppState) -> Router {
    let mut app = Router::new().route("/health", get(health_check));

    let swagger_enabled = match state.config.environment {
        config::Environment::Dev => true,
        config::Environment::Prod => state.config.swagger.enabled == config::SwaggerMode::Public,
    };

    if swagger_enabled {
        app =
            app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        // Keep the OpenAPI JSON for programmatic access even without the UI.
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    app.route(
        "/onboarding/documents",
        post(handlers::documents::upload_document),
    )
    .route("/onboarding/signup", post(handlers::signup::initiate_signup))
    .route(
        "/onboarding/signup/:id",
        get(handlers::signup::signup_status),
    )
    .route(
        "/onboarding/signup/:id/verify-mobile",
        post(handlers::signup::verify_mobile),
    )
    .route(
        "/onboarding/signup/:id/verify-email",
        post(handlers::signup::verify_email),
    )
    .route(
        "/onboarding/signup/:id/resend-mobile",
        post(handlers::signup::resend_mobile),
    )
    .route(
        "/onboarding/signup/:id/resend-email",
        post(handlers::signup::resend_email),
    )
    .route(
        "/onboarding/signup/:id/complete",
        post(handlers::signup::complete_signup),
    )
    .route(
        "/onboarding/rms/validate-code/:code",
        get(handlers::rm::validate_rm_code),
    )
    .with_state(state.clone())
    .layer(
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");

            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
            )
        }),
    )
    .layer(from_fn(request_id_middleware))
    .layer(from_fn(security_headers_middleware))
    .layer(
        CorsLayer::new()
            .allow_origin(
                state
                    .config
                    .security
                    .allowed_origins
                    .iter()
                    .filter_map(|o| {
                        o.parse::<HeaderValue>()
                            .map_err(|e| {
                                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                            })
                            .ok()
                    })
                    .collect::<Vec<HeaderValue>>(),
            )
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([axum::http::header::CONTENT_TYPE]),
    )
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let database = match &state.pool {
        Some(pool) => {
            db::health_check(pool).await.map_err(|e| {
                tracing::error!(error = %e, "Database health check failed");
                AppError::ServiceUnavailable
            })?;
            "up"
        }
        None => "in-memory",
    };

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "database": database
        }
    })))
}
