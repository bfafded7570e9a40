use onboarding_service::{
    build_router,
    config::OnboardingConfig,
    db,
    services::{
        LocalDocumentStorage, OtpSettings, PgRmDirectory, PgSignupStore, RmRegistrar, SignupService,
        SmsGateway, SmtpOtpMailer,
    },
    AppState,
};
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = OnboardingConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting onboarding service"
    );

    // Database
    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| service_core::error::AppError::DatabaseError(anyhow::anyhow!(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| service_core::error::AppError::DatabaseError(anyhow::anyhow!(e)))?;

    let store = Arc::new(PgSignupStore::new(pool.clone()));
    let rm_directory = Arc::new(PgRmDirectory::new(pool.clone()));
    let registrar = RmRegistrar::new(rm_directory);

    // Dispatch channels
    let email_sender = Arc::new(
        SmtpOtpMailer::new(&config.smtp)
            .map_err(|e| service_core::error::AppError::EmailError(e.to_string()))?,
    );
    let mobile_sender = Arc::new(SmsGateway::new(config.sms.clone()));
    tracing::info!(sms_enabled = config.sms.enabled, "Dispatch channels initialized");

    // Document storage
    let documents = Arc::new(
        LocalDocumentStorage::new(&config.documents.storage_path)
            .await
            .map_err(|e| {
                service_core::error::AppError::InternalError(anyhow::anyhow!(
                    "document storage init failed: {}",
                    e
                ))
            })?,
    );

    let signup = Arc::new(SignupService::new(
        store,
        registrar.clone(),
        mobile_sender,
        email_sender,
        OtpSettings::from(&config.otp),
    ));

    let state = AppState {
        config: config.clone(),
        signup,
        registrar,
        documents,
        pool: Some(pool),
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
