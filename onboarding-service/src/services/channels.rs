//! OTP dispatch channels: SMTP for email, a transactional SMS gateway for
//! mobile, and recording mocks for tests.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::config::{SmsConfig, SmtpConfig};

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel is not enabled: {0}")]
    NotEnabled(String),

    #[error("failed to reach provider: {0}")]
    Connection(String),

    #[error("provider rejected the dispatch: {0}")]
    SendFailed(String),
}

/// One dispatch channel. The orchestrator holds one sender per channel.
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn send_code(&self, destination: &str, code: &str) -> Result<(), ChannelError>;
}

// ============================================================================
// Email via SMTP
// ============================================================================

pub struct SmtpOtpMailer {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpOtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, ChannelError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| ChannelError::Connection(e.to_string()))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "SMTP OTP mailer initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }
}

#[async_trait]
impl OtpSender for SmtpOtpMailer {
    async fn send_code(&self, destination: &str, code: &str) -> Result<(), ChannelError> {
        let html_body = format!(
            r###"<html>
                <body style="font-family: Arial, sans-serif;">
                    <h2>Your verification code</h2>
                    <p>Use this code to verify your email address:</p>
                    <p style="font-size: 28px; letter-spacing: 6px; font-weight: bold;">{}</p>
                    <p style="color: #666; font-size: 12px;">
                        This code expires in 10 minutes. If you didn't request this, please ignore this email.
                    </p>
                </body>
            </html>"###,
            code
        );
        let plain_body = format!(
            "Your verification code is {}\n\nThis code expires in 10 minutes. If you didn't request this, please ignore this email.",
            code
        );

        let email = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| {
                        ChannelError::SendFailed(e.to_string())
                    })?,
            )
            .to(destination
                .parse()
                .map_err(|e: lettre::address::AddressError| {
                    ChannelError::SendFailed(e.to_string())
                })?)
            .subject("Your verification code")
            .multipart(
                lettre::message::MultiPart::alternative()
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        // Send on the blocking pool to avoid stalling the async runtime.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        match result {
            Ok(_) => {
                // Never log the code itself.
                tracing::info!(to = %destination, "OTP email dispatched");
                Ok(())
            }
            Err(e) => {
                tracing::error!(to = %destination, error = %e, "Failed to dispatch OTP email");
                Err(ChannelError::SendFailed(e.to_string()))
            }
        }
    }
}

// ============================================================================
// SMS via transactional gateway
// ============================================================================

pub struct SmsGateway {
    config: SmsConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct SmsGatewayRequest {
    sender: String,
    route: String,
    sms: Vec<SmsGatewayMessage>,
}

#[derive(Debug, Serialize)]
struct SmsGatewayMessage {
    message: String,
    to: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SmsGatewayResponse {
    #[serde(rename = "type")]
    response_type: String,
    message: String,
}

impl SmsGateway {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl OtpSender for SmsGateway {
    async fn send_code(&self, destination: &str, code: &str) -> Result<(), ChannelError> {
        if !self.config.enabled {
            return Err(ChannelError::NotEnabled(
                "SMS gateway is not enabled".to_string(),
            ));
        }

        // Keep digits and a leading + only.
        let normalized_phone: String = destination
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();

        if normalized_phone.is_empty() {
            return Err(ChannelError::SendFailed("phone number is empty".to_string()));
        }

        let request = SmsGatewayRequest {
            sender: self.config.sender_id.clone(),
            route: "4".to_string(), // transactional route
            sms: vec![SmsGatewayMessage {
                message: format!("Your verification code is {}. Valid for 10 minutes.", code),
                to: vec![normalized_phone],
            }],
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .header("authkey", &self.config.auth_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed(format!(
                "SMS gateway returned status {}: {}",
                status, body
            )));
        }

        let gateway_response: SmsGatewayResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        if gateway_response.response_type != "success" {
            return Err(ChannelError::SendFailed(gateway_response.message));
        }

        tracing::info!(to = %destination, "OTP SMS dispatched");
        Ok(())
    }
}

// ============================================================================
// Mocks for tests
// ============================================================================

/// Recording sender: keeps every dispatched `(destination, code)` pair so
/// tests can read the code they need to submit.
#[derive(Default)]
pub struct MockOtpSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl MockOtpSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// The most recently dispatched code, if any.
    pub fn last_code(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|(_, code)| code.clone())
    }

    pub fn last_destination(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|(to, _)| to.clone())
    }
}

#[async_trait]
impl OtpSender for MockOtpSender {
    async fn send_code(&self, destination: &str, code: &str) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), code.to_string()));
        Ok(())
    }
}

/// Sender that always fails, for upstream-failure paths.
pub struct FailingOtpSender;

#[async_trait]
impl OtpSender for FailingOtpSender {
    async fn send_code(&self, _destination: &str, _code: &str) -> Result<(), ChannelError> {
        Err(ChannelError::SendFailed("provider unavailable".to_string()))
    }
}
