//! End-to-end workflow test harness.
//!
//! Builds the full signup orchestrator against in-memory stores and
//! recording dispatch mocks, so the complete onboarding journey runs
//! in-process without Postgres, SMTP or an SMS gateway.

use chrono::Duration;
use std::collections::BTreeMap;
use std::sync::Arc;

use onboarding_service::services::{
    InMemoryRmDirectory, InMemorySignupStore, MockOtpSender, NewSignup, OtpSettings, RmRegistrar,
    SignupService,
};

pub struct WorkflowHarness {
    pub service: SignupService,
    pub store: Arc<InMemorySignupStore>,
    pub directory: Arc<InMemoryRmDirectory>,
    pub mobile: Arc<MockOtpSender>,
    pub email: Arc<MockOtpSender>,
}

impl WorkflowHarness {
    pub fn new() -> Self {
        Self::with_settings(OtpSettings {
            expiry: Duration::minutes(10),
            resend_cooldown: Duration::seconds(60),
            max_attempts: 5,
            request_ttl: Duration::hours(24),
        })
    }

    pub fn with_settings(settings: OtpSettings) -> Self {
        let store = Arc::new(InMemorySignupStore::new());
        let directory = Arc::new(InMemoryRmDirectory::new());
        let mobile = Arc::new(MockOtpSender::new());
        let email = Arc::new(MockOtpSender::new());

        let service = SignupService::new(
            store.clone(),
            RmRegistrar::new(directory.clone()),
            mobile.clone(),
            email.clone(),
            settings,
        );

        Self {
            service,
            store,
            directory,
            mobile,
            email,
        }
    }

    /// A valid signup input with both document references present.
    pub fn signup_input(name: &str, email: &str, phone: &str) -> NewSignup {
        NewSignup {
            name: name.to_string(),
            email: email.to_string(),
            phone: phone.to_string(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c3R1Yg$c3R1Ymhhc2g".to_string(),
            document_refs: BTreeMap::from([
                ("aadhaar_front".to_string(), "docs/aadhaar_front/1".to_string()),
                ("pan_image".to_string(), "docs/pan_image/1".to_string()),
            ]),
        }
    }
}

impl Default for WorkflowHarness {
    fn default() -> Self {
        Self::new()
    }
}
