//! Signup orchestrator: drives one onboarding attempt through OTP
//! verification on both channels to a durable RM record.
//!
//! All command handlers re-check wall-clock expiry before acting, so a
//! request that lapsed while idle is observed as expired without any timer
//! infrastructure.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::OtpConfig;
use crate::models::{
    ChannelKind, ChannelState, RelationshipManager, SignupRequest, SignupStatus,
    REQUIRED_DOCUMENT_KINDS,
};
use crate::services::channels::OtpSender;
use crate::services::error::SignupError;
use crate::services::otp::{self, MatchResult};
use crate::services::registrar::RmRegistrar;
use crate::services::store::{SignupRequestStore, StoreError};

/// Tunables lifted out of `OtpConfig` into `chrono` durations.
#[derive(Debug, Clone, Copy)]
pub struct OtpSettings {
    pub expiry: Duration,
    pub resend_cooldown: Duration,
    pub max_attempts: i32,
    pub request_ttl: Duration,
}

impl From<&OtpConfig> for OtpSettings {
    fn from(config: &OtpConfig) -> Self {
        Self {
            expiry: Duration::minutes(config.expiry_minutes),
            resend_cooldown: Duration::seconds(config.resend_cooldown_seconds),
            max_attempts: config.max_attempts,
            request_ttl: Duration::hours(config.request_ttl_hours),
        }
    }
}

/// Input for `initiate`. The password arrives pre-hashed; handlers own the
/// hashing so the orchestrator never sees plaintext credentials.
#[derive(Debug, Clone)]
pub struct NewSignup {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password_hash: String,
    pub document_refs: BTreeMap<String, String>,
}

/// Result of a successful `initiate`: the persisted request plus the
/// plaintext codes, which handlers may echo back in dev environments.
#[derive(Debug)]
pub struct InitiatedSignup {
    pub request: SignupRequest,
    pub mobile_code: String,
    pub email_code: String,
}

/// Result of a successful `resend`.
#[derive(Debug)]
pub struct ResentCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Verification flags after a `verify` command.
#[derive(Debug, Clone, Copy)]
pub struct VerificationOutcome {
    pub mobile_verified: bool,
    pub email_verified: bool,
    pub both_verified: bool,
}

impl VerificationOutcome {
    fn of(request: &SignupRequest) -> Self {
        Self {
            mobile_verified: request.mobile.verified,
            email_verified: request.email_channel.verified,
            both_verified: request.mobile.verified && request.email_channel.verified,
        }
    }
}

/// Read-only projection of one channel for status queries.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSnapshot {
    pub verified: bool,
    pub otp_expires_in_seconds: i64,
    pub resend_available_in_seconds: i64,
    pub attempts: i32,
}

/// Read-only projection of a request for status queries.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub id: Uuid,
    pub status: SignupStatus,
    pub mobile: ChannelSnapshot,
    pub email: ChannelSnapshot,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub struct SignupService {
    store: Arc<dyn SignupRequestStore>,
    registrar: RmRegistrar,
    mobile_sender: Arc<dyn OtpSender>,
    email_sender: Arc<dyn OtpSender>,
    settings: OtpSettings,
    // Per-request command serialization; contact locks serialize initiates
    // for the same (email, phone) pair.
    request_locks: DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>,
    contact_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl SignupService {
    pub fn new(
        store: Arc<dyn SignupRequestStore>,
        registrar: RmRegistrar,
        mobile_sender: Arc<dyn OtpSender>,
        email_sender: Arc<dyn OtpSender>,
        settings: OtpSettings,
    ) -> Self {
        Self {
            store,
            registrar,
            mobile_sender,
            email_sender,
            settings,
            request_locks: DashMap::new(),
            contact_locks: DashMap::new(),
        }
    }

    pub fn settings(&self) -> OtpSettings {
        self.settings
    }

    fn request_lock(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.request_locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn contact_lock(&self, email: &str, phone: &str) -> Arc<tokio::sync::Mutex<()>> {
        let key = format!("{}|{}", email, phone);
        self.contact_locks
            .entry(key)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // Lock entries are dropped once no command holds or awaits them, so the
    // maps stay bounded by in-flight commands instead of growing per signup.
    // `strong_count == 1` means only the map itself still references the
    // mutex; a concurrent waiter keeps the entry alive and cleans up on its
    // own release.
    fn release_request_lock(&self, id: Uuid) {
        self.request_locks
            .remove_if(&id, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn release_contact_lock(&self, email: &str, phone: &str) {
        let key = format!("{}|{}", email, phone);
        self.contact_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Start a new onboarding attempt: reserve the contact pair, persist the
    /// request and dispatch one code per channel.
    ///
    /// Dispatch failure rolls the persisted request back, so a failed
    /// initiate leaves nothing blocking the pair.
    pub async fn initiate(&self, new: NewSignup) -> Result<InitiatedSignup, SignupError> {
        for kind in REQUIRED_DOCUMENT_KINDS {
            if !new.document_refs.contains_key(kind) {
                return Err(SignupError::MissingDocument(kind.to_string()));
            }
        }

        let email = new.email.to_lowercase();
        let phone = new.phone.clone();

        let lock = self.contact_lock(&email, &phone);
        let guard = lock.lock().await;
        let result = self.initiate_locked(new, &email).await;
        drop(guard);
        drop(lock);
        self.release_contact_lock(&email, &phone);
        result
    }

    async fn initiate_locked(
        &self,
        new: NewSignup,
        email: &str,
    ) -> Result<InitiatedSignup, SignupError> {
        let now = Utc::now();

        // A contact pair already bound to an RM can never re-enter signup.
        if self
            .registrar
            .find_by_contact(email, &new.phone)
            .await?
            .is_some()
        {
            return Err(SignupError::DuplicateContact);
        }

        let mobile_code = otp::generate_otp(otp::OTP_LENGTH);
        let email_code = otp::generate_otp(otp::OTP_LENGTH);
        let expires_at = now + self.settings.expiry;

        let request = SignupRequest::new(
            new.name,
            email.to_string(),
            new.phone,
            new.password_hash,
            new.document_refs,
            ChannelState::new(otp::hash_otp(&mobile_code), expires_at, now),
            ChannelState::new(otp::hash_otp(&email_code), expires_at, now),
            now,
        );

        match self
            .store
            .create(&request, now, self.settings.request_ttl)
            .await
        {
            Ok(()) => {}
            Err(StoreError::DuplicateContact) => return Err(SignupError::DuplicateContact),
            Err(e) => return Err(SignupError::Internal(anyhow::anyhow!(e))),
        }

        if let Err(e) = self.dispatch_both(&request, &mobile_code, &email_code).await {
            // Roll back so the pair is immediately free to retry.
            if let Err(del) = self.store.delete(request.id).await {
                tracing::error!(signup_request_id = %request.id, error = %del,
                    "Failed to roll back signup request after dispatch failure");
            }
            return Err(e);
        }

        tracing::info!(signup_request_id = %request.id, "Signup initiated, codes dispatched");

        Ok(InitiatedSignup {
            request,
            mobile_code,
            email_code,
        })
    }

    async fn dispatch_both(
        &self,
        request: &SignupRequest,
        mobile_code: &str,
        email_code: &str,
    ) -> Result<(), SignupError> {
        self.mobile_sender
            .send_code(&request.phone, mobile_code)
            .await
            .map_err(|e| SignupError::Upstream(format!("mobile OTP dispatch failed: {}", e)))?;
        self.email_sender
            .send_code(&request.email, email_code)
            .await
            .map_err(|e| SignupError::Upstream(format!("email OTP dispatch failed: {}", e)))?;
        Ok(())
    }

    /// Check a submitted code against one channel.
    ///
    /// Verifying an already verified channel is a no-op success. A wrong code
    /// burns one attempt; exhausting the per-channel attempt cap fails the
    /// whole request permanently.
    pub async fn verify(
        &self,
        id: Uuid,
        kind: ChannelKind,
        submitted: &str,
    ) -> Result<VerificationOutcome, SignupError> {
        let lock = self.request_lock(id);
        let guard = lock.lock().await;
        let result = self.verify_locked(id, kind, submitted).await;
        drop(guard);
        drop(lock);
        self.release_request_lock(id);
        result
    }

    async fn verify_locked(
        &self,
        id: Uuid,
        kind: ChannelKind,
        submitted: &str,
    ) -> Result<VerificationOutcome, SignupError> {
        let now = Utc::now();
        let mut request = self.load_live(id, now).await?;

        if request.channel(kind).verified {
            return Ok(VerificationOutcome::of(&request));
        }

        let channel = request.channel(kind);
        match otp::verify(&channel.otp_hash, channel.otp_expires_at, submitted, now) {
            MatchResult::Expired => Err(SignupError::ExpiredOtp),
            MatchResult::Mismatch => {
                let channel = request.channel_mut(kind);
                channel.attempts += 1;
                let exhausted = channel.attempts >= self.settings.max_attempts;
                if exhausted {
                    request.status = SignupStatus::Failed;
                    tracing::warn!(signup_request_id = %id, channel = kind.as_str(),
                        "OTP attempt cap exhausted, signup failed");
                }
                self.persist(&request).await?;
                Err(SignupError::InvalidOtp)
            }
            MatchResult::Match => {
                request.channel_mut(kind).verified = true;
                request.advance_after_verification();
                self.persist(&request).await?;
                tracing::info!(signup_request_id = %id, channel = kind.as_str(),
                    status = request.status.as_str(), "Channel verified");
                Ok(VerificationOutcome::of(&request))
            }
        }
    }

    /// Issue a fresh code on one channel, superseding the previous one.
    ///
    /// The new code is dispatched before anything is persisted, so a provider
    /// failure leaves the old code valid.
    pub async fn resend(&self, id: Uuid, kind: ChannelKind) -> Result<ResentCode, SignupError> {
        let lock = self.request_lock(id);
        let guard = lock.lock().await;
        let result = self.resend_locked(id, kind).await;
        drop(guard);
        drop(lock);
        self.release_request_lock(id);
        result
    }

    async fn resend_locked(&self, id: Uuid, kind: ChannelKind) -> Result<ResentCode, SignupError> {
        let now = Utc::now();
        let mut request = self.load_live(id, now).await?;

        if request.channel(kind).verified {
            return Err(SignupError::InvalidState(format!(
                "{} channel is already verified",
                kind.as_str()
            )));
        }

        let last_sent = request.channel(kind).last_sent_at;
        if !otp::can_resend(last_sent, now, self.settings.resend_cooldown) {
            return Err(SignupError::CooldownActive {
                retry_after_seconds: otp::resend_available_in(
                    last_sent,
                    now,
                    self.settings.resend_cooldown,
                ),
            });
        }

        let code = otp::generate_otp(otp::OTP_LENGTH);
        let expires_at = now + self.settings.expiry;

        let sender = match kind {
            ChannelKind::Mobile => &self.mobile_sender,
            ChannelKind::Email => &self.email_sender,
        };
        let destination = match kind {
            ChannelKind::Mobile => request.phone.clone(),
            ChannelKind::Email => request.email.clone(),
        };
        sender
            .send_code(&destination, &code)
            .await
            .map_err(|e| SignupError::Upstream(format!("OTP dispatch failed: {}", e)))?;

        request
            .channel_mut(kind)
            .replace_code(otp::hash_otp(&code), expires_at, now);
        self.persist(&request).await?;

        tracing::info!(signup_request_id = %id, channel = kind.as_str(), "OTP code resent");

        Ok(ResentCode { code, expires_at })
    }

    /// Promote a fully verified request to an active RM record.
    ///
    /// Idempotent: completing an already completed request returns the same
    /// RM again.
    pub async fn complete(&self, id: Uuid) -> Result<RelationshipManager, SignupError> {
        let lock = self.request_lock(id);
        let guard = lock.lock().await;
        let result = self.complete_locked(id).await;
        drop(guard);
        drop(lock);
        self.release_request_lock(id);
        result
    }

    async fn complete_locked(&self, id: Uuid) -> Result<RelationshipManager, SignupError> {
        let now = Utc::now();
        let request = match self.store.get(id).await.map_err(internal)? {
            Some(r) => r,
            None => return Err(SignupError::NotFound),
        };

        if request.status == SignupStatus::Completed {
            return self
                .registrar
                .find_by_signup_request(id)
                .await?
                .ok_or_else(|| {
                    SignupError::Internal(anyhow::anyhow!(
                        "completed request {} has no RM record",
                        id
                    ))
                });
        }

        if request.has_lapsed(now, self.settings.request_ttl) {
            self.mark_expired(request).await?;
            return Err(SignupError::NotFound);
        }

        if request.status != SignupStatus::BothVerified {
            return Err(SignupError::InvalidState(format!(
                "signup is not fully verified (status: {})",
                request.status.as_str()
            )));
        }

        // RM creation commits first; if the status update below is lost the
        // registrar's idempotency makes a retried complete converge.
        let rm = self.registrar.create(&request).await?;

        let mut request = request;
        request.status = SignupStatus::Completed;
        request.completed_at = Some(now);
        self.persist(&request).await?;

        tracing::info!(signup_request_id = %id, rm_code = %rm.rm_code, "Signup completed");

        Ok(rm)
    }

    /// Point-in-time view of a request. Lapsed requests are flipped to
    /// `EXPIRED` on observation and reported as such.
    ///
    /// Takes the per-request lock like every other command: the lapse check
    /// may persist, and racing an unlocked write against a resend at the
    /// expiry boundary could clobber a freshly dispatched code.
    pub async fn status(&self, id: Uuid) -> Result<StatusSnapshot, SignupError> {
        let lock = self.request_lock(id);
        let guard = lock.lock().await;
        let result = self.status_locked(id).await;
        drop(guard);
        drop(lock);
        self.release_request_lock(id);
        result
    }

    async fn status_locked(&self, id: Uuid) -> Result<StatusSnapshot, SignupError> {
        let now = Utc::now();
        let mut request = match self.store.get(id).await.map_err(internal)? {
            Some(r) => r,
            None => return Err(SignupError::NotFound),
        };

        if request.has_lapsed(now, self.settings.request_ttl) {
            request.status = SignupStatus::Expired;
            self.persist(&request).await?;
        }

        let snapshot_of = |channel: &ChannelState| ChannelSnapshot {
            verified: channel.verified,
            otp_expires_in_seconds: otp::expires_in(channel.otp_expires_at, now),
            resend_available_in_seconds: otp::resend_available_in(
                channel.last_sent_at,
                now,
                self.settings.resend_cooldown,
            ),
            attempts: channel.attempts,
        };

        Ok(StatusSnapshot {
            id: request.id,
            status: request.status,
            mobile: snapshot_of(&request.mobile),
            email: snapshot_of(&request.email_channel),
            created_at: request.created_at,
            completed_at: request.completed_at,
        })
    }

    /// Load a request that must still accept commands.
    ///
    /// Lapsed requests are persisted as `EXPIRED` and reported `NotFound`;
    /// terminal requests are rejected with `InvalidState`.
    async fn load_live(&self, id: Uuid, now: DateTime<Utc>) -> Result<SignupRequest, SignupError> {
        let request = match self.store.get(id).await.map_err(internal)? {
            Some(r) => r,
            None => return Err(SignupError::NotFound),
        };

        if request.has_lapsed(now, self.settings.request_ttl) {
            self.mark_expired(request).await?;
            return Err(SignupError::NotFound);
        }

        if request.status.is_terminal() {
            return Err(SignupError::InvalidState(format!(
                "signup is in terminal state {}",
                request.status.as_str()
            )));
        }

        Ok(request)
    }

    async fn mark_expired(&self, mut request: SignupRequest) -> Result<(), SignupError> {
        request.status = SignupStatus::Expired;
        self.persist(&request).await
    }

    async fn persist(&self, request: &SignupRequest) -> Result<(), SignupError> {
        self.store.update(request).await.map_err(internal)
    }
}

fn internal(err: StoreError) -> SignupError {
    SignupError::Internal(anyhow::anyhow!("signup store failure: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::channels::{FailingOtpSender, MockOtpSender};
    use crate::services::store::{InMemoryRmDirectory, InMemorySignupStore, RmDirectory};

    struct Harness {
        service: SignupService,
        store: Arc<InMemorySignupStore>,
        mobile: Arc<MockOtpSender>,
        email: Arc<MockOtpSender>,
    }

    fn harness() -> Harness {
        harness_with(settings())
    }

    fn settings() -> OtpSettings {
        OtpSettings {
            expiry: Duration::minutes(10),
            resend_cooldown: Duration::seconds(60),
            max_attempts: 5,
            request_ttl: Duration::hours(24),
        }
    }

    fn harness_with(settings: OtpSettings) -> Harness {
        let store = Arc::new(InMemorySignupStore::new());
        let mobile = Arc::new(MockOtpSender::new());
        let email = Arc::new(MockOtpSender::new());
        let registrar = RmRegistrar::new(Arc::new(InMemoryRmDirectory::new()));
        let service = SignupService::new(
            store.clone(),
            registrar,
            mobile.clone(),
            email.clone(),
            settings,
        );
        Harness {
            service,
            store,
            mobile,
            email,
        }
    }

    fn new_signup(email: &str, phone: &str) -> NewSignup {
        NewSignup {
            name: "Alice".to_string(),
            email: email.to_string(),
            phone: phone.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            document_refs: BTreeMap::from([
                ("aadhaar_front".to_string(), "ref-1".to_string()),
                ("pan_image".to_string(), "ref-2".to_string()),
            ]),
        }
    }

    #[tokio::test]
    async fn test_initiate_dispatches_independent_codes() {
        let h = harness();
        let initiated = h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();

        assert_eq!(initiated.request.status, SignupStatus::Initiated);
        assert_eq!(h.mobile.sent_count(), 1);
        assert_eq!(h.email.sent_count(), 1);
        assert_eq!(h.mobile.last_code().unwrap(), initiated.mobile_code);
        assert_eq!(h.email.last_code().unwrap(), initiated.email_code);
        assert_eq!(h.email.last_destination().unwrap(), "a@x.com");
    }

    #[tokio::test]
    async fn test_initiate_requires_all_documents() {
        let h = harness();
        let mut signup = new_signup("a@x.com", "9000000001");
        signup.document_refs.remove("pan_image");

        let err = h.service.initiate(signup).await.unwrap_err();
        assert!(matches!(err, SignupError::MissingDocument(kind) if kind == "pan_image"));
        assert_eq!(h.mobile.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_initiate_rejects_active_duplicate() {
        let h = harness();
        h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();

        let err = h
            .service
            .initiate(new_signup("a@x.com", "9000000001"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignupError::DuplicateContact));
    }

    #[tokio::test]
    async fn test_dispatch_failure_leaves_no_request_behind() {
        let store = Arc::new(InMemorySignupStore::new());
        let registrar = RmRegistrar::new(Arc::new(InMemoryRmDirectory::new()));
        let service = SignupService::new(
            store.clone(),
            registrar,
            Arc::new(FailingOtpSender),
            Arc::new(MockOtpSender::new()),
            settings(),
        );

        let err = service
            .initiate(new_signup("a@x.com", "9000000001"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignupError::Upstream(_)));

        // The pair is free to retry immediately.
        let active = store
            .find_active_by_contact("a@x.com", "9000000001", Utc::now(), Duration::hours(24))
            .await
            .unwrap();
        assert!(active.is_none());
    }

    #[tokio::test]
    async fn test_verify_both_channels_in_either_order() {
        let h = harness();
        let initiated = h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
        let id = initiated.request.id;

        let outcome = h
            .service
            .verify(id, ChannelKind::Email, &initiated.email_code)
            .await
            .unwrap();
        assert!(outcome.email_verified && !outcome.mobile_verified);

        let outcome = h
            .service
            .verify(id, ChannelKind::Mobile, &initiated.mobile_code)
            .await
            .unwrap();
        assert!(outcome.both_verified);

        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignupStatus::BothVerified);
    }

    #[tokio::test]
    async fn test_verify_is_idempotent_on_verified_channel() {
        let h = harness();
        let initiated = h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
        let id = initiated.request.id;

        h.service
            .verify(id, ChannelKind::Mobile, &initiated.mobile_code)
            .await
            .unwrap();
        // Same channel again, even with a garbage code.
        let outcome = h.service.verify(id, ChannelKind::Mobile, "000000").await.unwrap();
        assert!(outcome.mobile_verified);
    }

    #[tokio::test]
    async fn test_wrong_code_burns_attempts_until_failed() {
        let h = harness_with(OtpSettings {
            max_attempts: 3,
            ..settings()
        });
        let initiated = h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
        let id = initiated.request.id;

        for _ in 0..3 {
            let err = h.service.verify(id, ChannelKind::Mobile, "000000").await.unwrap_err();
            assert!(matches!(err, SignupError::InvalidOtp));
        }

        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignupStatus::Failed);

        // The correct code no longer helps.
        let err = h
            .service
            .verify(id, ChannelKind::Mobile, &initiated.mobile_code)
            .await
            .unwrap_err();
        assert!(matches!(err, SignupError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_attempts_survive_resend() {
        let h = harness_with(OtpSettings {
            max_attempts: 3,
            resend_cooldown: Duration::seconds(0),
            ..settings()
        });
        let initiated = h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
        let id = initiated.request.id;

        h.service.verify(id, ChannelKind::Mobile, "000000").await.unwrap_err();
        h.service.verify(id, ChannelKind::Mobile, "000001").await.unwrap_err();

        h.service.resend(id, ChannelKind::Mobile).await.unwrap();

        // Third wrong attempt after the resend still fails the request.
        h.service.verify(id, ChannelKind::Mobile, "000002").await.unwrap_err();
        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignupStatus::Failed);
    }

    #[tokio::test]
    async fn test_resend_respects_cooldown_and_supersedes_code() {
        let h = harness();
        let initiated = h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
        let id = initiated.request.id;

        let err = h.service.resend(id, ChannelKind::Mobile).await.unwrap_err();
        assert!(matches!(
            err,
            SignupError::CooldownActive { retry_after_seconds } if retry_after_seconds > 0
        ));

        // Age the last dispatch past the cooldown.
        let mut stored = h.store.get(id).await.unwrap().unwrap();
        stored.mobile.last_sent_at = stored.mobile.last_sent_at - Duration::seconds(61);
        h.store.update(&stored).await.unwrap();

        let resent = h.service.resend(id, ChannelKind::Mobile).await.unwrap();
        assert_eq!(h.mobile.sent_count(), 2);

        // The original code is permanently superseded.
        let err = h
            .service
            .verify(id, ChannelKind::Mobile, &initiated.mobile_code)
            .await
            .unwrap_err();
        assert!(matches!(err, SignupError::InvalidOtp));
        h.service.verify(id, ChannelKind::Mobile, &resent.code).await.unwrap();
    }

    #[tokio::test]
    async fn test_resend_dispatch_failure_keeps_old_code_valid() {
        use crate::services::channels::ChannelError;
        use std::sync::atomic::{AtomicBool, Ordering};

        // Succeeds on the initiate dispatch, fails afterwards.
        struct FlakySender {
            inner: MockOtpSender,
            failing: AtomicBool,
        }

        #[async_trait::async_trait]
        impl crate::services::channels::OtpSender for FlakySender {
            async fn send_code(&self, destination: &str, code: &str) -> Result<(), ChannelError> {
                if self.failing.load(Ordering::SeqCst) {
                    return Err(ChannelError::SendFailed("provider down".to_string()));
                }
                self.inner.send_code(destination, code).await
            }
        }

        let flaky = Arc::new(FlakySender {
            inner: MockOtpSender::new(),
            failing: AtomicBool::new(false),
        });
        let store = Arc::new(InMemorySignupStore::new());
        let registrar = RmRegistrar::new(Arc::new(InMemoryRmDirectory::new()));
        let service = SignupService::new(
            store.clone(),
            registrar,
            flaky.clone(),
            Arc::new(MockOtpSender::new()),
            OtpSettings {
                resend_cooldown: Duration::seconds(0),
                ..settings()
            },
        );

        let initiated = service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
        let id = initiated.request.id;

        flaky.failing.store(true, Ordering::SeqCst);
        let err = service.resend(id, ChannelKind::Mobile).await.unwrap_err();
        assert!(matches!(err, SignupError::Upstream(_)));

        // The original code still verifies.
        service
            .verify(id, ChannelKind::Mobile, &initiated.mobile_code)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_overall_ttl_expires_half_verified_request() {
        let h = harness();
        let initiated = h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
        let id = initiated.request.id;
        h.service
            .verify(id, ChannelKind::Mobile, &initiated.mobile_code)
            .await
            .unwrap();

        // Even a half-verified request dies once the TTL runs out.
        let mut stored = h.store.get(id).await.unwrap().unwrap();
        stored.created_at = stored.created_at - Duration::hours(25);
        h.store.update(&stored).await.unwrap();

        let err = h.service.resend(id, ChannelKind::Email).await.unwrap_err();
        assert!(matches!(err, SignupError::NotFound));

        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignupStatus::Expired);
    }

    #[tokio::test]
    async fn test_resend_rejected_on_verified_channel() {
        let h = harness();
        let initiated = h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
        let id = initiated.request.id;

        h.service
            .verify(id, ChannelKind::Email, &initiated.email_code)
            .await
            .unwrap();
        let err = h.service.resend(id, ChannelKind::Email).await.unwrap_err();
        assert!(matches!(err, SignupError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_complete_requires_both_verified() {
        let h = harness();
        let initiated = h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
        let id = initiated.request.id;

        let err = h.service.complete(id).await.unwrap_err();
        assert!(matches!(err, SignupError::InvalidState(_)));

        h.service.verify(id, ChannelKind::Mobile, &initiated.mobile_code).await.unwrap();
        h.service.verify(id, ChannelKind::Email, &initiated.email_code).await.unwrap();

        let rm = h.service.complete(id).await.unwrap();
        assert!(rm.rm_code.starts_with("RM-"));
        assert_eq!(rm.signup_request_id, id);

        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignupStatus::Completed);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let h = harness();
        let initiated = h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
        let id = initiated.request.id;
        h.service.verify(id, ChannelKind::Mobile, &initiated.mobile_code).await.unwrap();
        h.service.verify(id, ChannelKind::Email, &initiated.email_code).await.unwrap();

        let first = h.service.complete(id).await.unwrap();
        let second = h.service.complete(id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.rm_code, second.rm_code);
    }

    #[tokio::test]
    async fn test_lapsed_request_reports_not_found_and_frees_pair() {
        let h = harness();
        let initiated = h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
        let id = initiated.request.id;

        // Age both windows past expiry with neither channel verified.
        let mut stored = h.store.get(id).await.unwrap().unwrap();
        let past = Utc::now() - Duration::minutes(11);
        stored.mobile.otp_expires_at = past;
        stored.email_channel.otp_expires_at = past;
        h.store.update(&stored).await.unwrap();

        let err = h
            .service
            .verify(id, ChannelKind::Mobile, &initiated.mobile_code)
            .await
            .unwrap_err();
        assert!(matches!(err, SignupError::NotFound));

        let stored = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignupStatus::Expired);

        // The same pair can start over.
        h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_projects_channel_timers() {
        let h = harness();
        let initiated = h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
        let id = initiated.request.id;

        h.service.verify(id, ChannelKind::Mobile, &initiated.mobile_code).await.unwrap();

        let snapshot = h.service.status(id).await.unwrap();
        assert_eq!(snapshot.status, SignupStatus::MobileVerified);
        assert!(snapshot.mobile.verified);
        assert!(!snapshot.email.verified);
        assert!(snapshot.email.otp_expires_in_seconds > 0);
        assert!(snapshot.email.resend_available_in_seconds > 0);
    }

    #[tokio::test]
    async fn test_status_of_unknown_request() {
        let h = harness();
        let err = h.service.status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SignupError::NotFound));
    }

    #[tokio::test]
    async fn test_lock_maps_drain_after_commands() {
        let h = harness();

        for i in 0..10 {
            let initiated = h
                .service
                .initiate(new_signup(&format!("a{}@x.com", i), &format!("900000{:04}", i)))
                .await
                .unwrap();
            let id = initiated.request.id;
            h.service.verify(id, ChannelKind::Mobile, &initiated.mobile_code).await.unwrap();
            h.service.verify(id, ChannelKind::Email, &initiated.email_code).await.unwrap();
            h.service.complete(id).await.unwrap();
            h.service.status(id).await.unwrap();
        }

        // No command in flight, so neither map retains entries.
        assert_eq!(h.service.request_locks.len(), 0);
        assert_eq!(h.service.contact_locks.len(), 0);
    }

    #[tokio::test]
    async fn test_status_serializes_with_other_commands() {
        let h = harness();
        let initiated = h.service.initiate(new_signup("a@x.com", "9000000001")).await.unwrap();
        let id = initiated.request.id;

        let lock = h.service.request_lock(id);
        let guard = lock.lock().await;

        // While another command holds the request lock, status must wait.
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            h.service.status(id),
        )
        .await;
        assert!(blocked.is_err());

        drop(guard);
        let snapshot = h.service.status(id).await.unwrap();
        assert_eq!(snapshot.status, SignupStatus::Initiated);
    }
}
