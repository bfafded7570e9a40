//! Shared test harness: the full router wired to in-memory stores and
//! recording dispatch mocks, so tests run without Postgres or providers.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use onboarding_service::config::{
    DatabaseConfig, DocumentsConfig, Environment, OnboardingConfig, OtpConfig, SecurityConfig,
    SmsConfig, SmtpConfig, SwaggerConfig, SwaggerMode,
};
use onboarding_service::services::{
    InMemoryRmDirectory, InMemorySignupStore, MockDocumentStorage, MockOtpSender, OtpSender,
    OtpSettings, RmRegistrar, SignupService,
};
use onboarding_service::{build_router, AppState};

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemorySignupStore>,
    pub mobile: Arc<MockOtpSender>,
    pub email: Arc<MockOtpSender>,
}

pub fn test_config() -> OnboardingConfig {
    OnboardingConfig {
        common: service_core::config::Config { port: 0 },
        environment: Environment::Dev,
        service_name: "onboarding-service".to_string(),
        service_version: "test".to_string(),
        log_level: "warn".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 587,
            user: String::new(),
            password: String::new(),
            from: "noreply@localhost".to_string(),
        },
        sms: SmsConfig {
            enabled: false,
            api_url: String::new(),
            auth_key: String::new(),
            sender_id: "TEST".to_string(),
        },
        documents: DocumentsConfig {
            storage_path: "./unused".to_string(),
        },
        otp: OtpConfig {
            expiry_minutes: 10,
            resend_cooldown_seconds: 60,
            max_attempts: 5,
            request_ttl_hours: 24,
            debug_echo: true,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Disabled,
        },
    }
}

pub fn test_app() -> TestApp {
    let mobile = Arc::new(MockOtpSender::new());
    let email = Arc::new(MockOtpSender::new());
    test_app_with_senders(mobile.clone(), email.clone(), mobile, email)
}

/// Build the app with explicit sender trait objects, keeping handles on the
/// recording mocks when the injected senders are those mocks.
pub fn test_app_with_senders(
    mobile_sender: Arc<dyn OtpSender>,
    email_sender: Arc<dyn OtpSender>,
    mobile: Arc<MockOtpSender>,
    email: Arc<MockOtpSender>,
) -> TestApp {
    let config = test_config();
    let store = Arc::new(InMemorySignupStore::new());
    let registrar = RmRegistrar::new(Arc::new(InMemoryRmDirectory::new()));

    let signup = Arc::new(SignupService::new(
        store.clone(),
        registrar.clone(),
        mobile_sender,
        email_sender,
        OtpSettings::from(&config.otp),
    ));

    let state = AppState {
        config,
        signup,
        registrar,
        documents: Arc::new(MockDocumentStorage),
        pool: None,
    };

    TestApp {
        router: build_router(state),
        store,
        mobile,
        email,
    }
}

pub async fn post_json(
    router: &Router,
    path: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

pub async fn post_empty(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

pub async fn get(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

/// Initiate a signup with both document references and return the response
/// body (which carries the echoed codes in the test config).
pub async fn initiate(router: &Router, email: &str, phone: &str) -> serde_json::Value {
    let (status, body) = post_json(
        router,
        "/onboarding/signup",
        serde_json::json!({
            "name": "Alice Kumar",
            "email": email,
            "phone": phone,
            "password": "s3curePassword",
            "document_refs": {
                "aadhaar_front": "mock/aadhaar_front/ref-1",
                "pan_image": "mock/pan_image/ref-2"
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "initiate failed: {}", body);
    body
}
