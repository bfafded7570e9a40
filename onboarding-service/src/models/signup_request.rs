//! Signup request model - one in-flight RM onboarding attempt.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Document kinds that must be present before a signup can be initiated.
pub const REQUIRED_DOCUMENT_KINDS: [&str; 2] = ["aadhaar_front", "pan_image"];

/// Signup request lifecycle states.
///
/// `Completed`, `Expired` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignupStatus {
    Initiated,
    MobileVerified,
    EmailVerified,
    BothVerified,
    Completed,
    Expired,
    Failed,
}

impl SignupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignupStatus::Initiated => "INITIATED",
            SignupStatus::MobileVerified => "MOBILE_VERIFIED",
            SignupStatus::EmailVerified => "EMAIL_VERIFIED",
            SignupStatus::BothVerified => "BOTH_VERIFIED",
            SignupStatus::Completed => "COMPLETED",
            SignupStatus::Expired => "EXPIRED",
            SignupStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INITIATED" => Some(SignupStatus::Initiated),
            "MOBILE_VERIFIED" => Some(SignupStatus::MobileVerified),
            "EMAIL_VERIFIED" => Some(SignupStatus::EmailVerified),
            "BOTH_VERIFIED" => Some(SignupStatus::BothVerified),
            "COMPLETED" => Some(SignupStatus::Completed),
            "EXPIRED" => Some(SignupStatus::Expired),
            "FAILED" => Some(SignupStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states admit no further commands.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignupStatus::Completed | SignupStatus::Expired | SignupStatus::Failed
        )
    }
}

/// The two verification channels, each with its own code, expiry and cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Mobile,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Mobile => "mobile",
            ChannelKind::Email => "email",
        }
    }
}

/// Per-channel OTP state, independent for mobile and email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelState {
    pub otp_hash: String,
    pub otp_expires_at: DateTime<Utc>,
    pub last_sent_at: DateTime<Utc>,
    pub attempts: i32,
    pub verified: bool,
}

impl ChannelState {
    pub fn new(otp_hash: String, expires_at: DateTime<Utc>, sent_at: DateTime<Utc>) -> Self {
        Self {
            otp_hash,
            otp_expires_at: expires_at,
            last_sent_at: sent_at,
            attempts: 0,
            verified: false,
        }
    }

    /// Replace the stored code. The superseded code becomes permanently
    /// invalid even if its window had not lapsed.
    pub fn replace_code(&mut self, otp_hash: String, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.otp_hash = otp_hash;
        self.otp_expires_at = expires_at;
        self.last_sent_at = now;
    }
}

/// Durable record of one in-flight onboarding attempt.
#[derive(Debug, Clone)]
pub struct SignupRequest {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password_hash: String,
    pub document_refs: BTreeMap<String, String>,
    pub status: SignupStatus,
    pub mobile: ChannelState,
    pub email_channel: ChannelState,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SignupRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        email: String,
        phone: String,
        password_hash: String,
        document_refs: BTreeMap<String, String>,
        mobile: ChannelState,
        email_channel: ChannelState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            email: email.to_lowercase(),
            phone,
            password_hash,
            document_refs,
            status: SignupStatus::Initiated,
            mobile,
            email_channel,
            created_at: now,
            completed_at: None,
        }
    }

    pub fn channel(&self, kind: ChannelKind) -> &ChannelState {
        match kind {
            ChannelKind::Mobile => &self.mobile,
            ChannelKind::Email => &self.email_channel,
        }
    }

    pub fn channel_mut(&mut self, kind: ChannelKind) -> &mut ChannelState {
        match kind {
            ChannelKind::Mobile => &mut self.mobile,
            ChannelKind::Email => &mut self.email_channel,
        }
    }

    /// Recompute status after a channel has been verified.
    pub fn advance_after_verification(&mut self) {
        self.status = match (self.mobile.verified, self.email_channel.verified) {
            (true, true) => SignupStatus::BothVerified,
            (true, false) => SignupStatus::MobileVerified,
            (false, true) => SignupStatus::EmailVerified,
            (false, false) => SignupStatus::Initiated,
        };
    }

    /// Lazy expiry check against wall-clock time.
    ///
    /// A request lapses when both channels remain unverified past both OTP
    /// windows, or when it outlives the overall TTL without completing.
    pub fn has_lapsed(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let both_unverified_and_lapsed = !self.mobile.verified
            && !self.email_channel.verified
            && now > self.mobile.otp_expires_at
            && now > self.email_channel.otp_expires_at;
        both_unverified_and_lapsed || now > self.created_at + ttl
    }

    /// True while the request still blocks its `(email, phone)` pair.
    pub fn is_active(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        !self.status.is_terminal() && !self.has_lapsed(now, ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(expires: DateTime<Utc>, sent: DateTime<Utc>) -> ChannelState {
        ChannelState::new("hash".to_string(), expires, sent)
    }

    fn request(now: DateTime<Utc>, window: Duration) -> SignupRequest {
        SignupRequest::new(
            "Alice".to_string(),
            "A@x.com".to_string(),
            "9000000001".to_string(),
            "$argon2id$stub".to_string(),
            BTreeMap::from([
                ("aadhaar_front".to_string(), "ref-1".to_string()),
                ("pan_image".to_string(), "ref-2".to_string()),
            ]),
            channel(now + window, now),
            channel(now + window, now),
            now,
        )
    }

    #[test]
    fn test_email_is_lowercased() {
        let now = Utc::now();
        let req = request(now, Duration::minutes(10));
        assert_eq!(req.email, "a@x.com");
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            SignupStatus::Initiated,
            SignupStatus::MobileVerified,
            SignupStatus::EmailVerified,
            SignupStatus::BothVerified,
            SignupStatus::Completed,
            SignupStatus::Expired,
            SignupStatus::Failed,
        ] {
            assert_eq!(SignupStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SignupStatus::parse("NOPE"), None);
    }

    #[test]
    fn test_advance_is_order_independent() {
        let now = Utc::now();
        let mut req = request(now, Duration::minutes(10));

        req.email_channel.verified = true;
        req.advance_after_verification();
        assert_eq!(req.status, SignupStatus::EmailVerified);

        req.mobile.verified = true;
        req.advance_after_verification();
        assert_eq!(req.status, SignupStatus::BothVerified);
    }

    #[test]
    fn test_lapses_when_both_windows_passed_unverified() {
        let now = Utc::now();
        let req = request(now, Duration::minutes(10));
        let ttl = Duration::hours(24);

        assert!(!req.has_lapsed(now, ttl));
        assert!(req.has_lapsed(now + Duration::minutes(11), ttl));
    }

    #[test]
    fn test_single_verified_channel_keeps_request_alive() {
        let now = Utc::now();
        let mut req = request(now, Duration::minutes(10));
        req.mobile.verified = true;
        req.advance_after_verification();

        // Email window lapsed, but the mobile verification keeps it resumable.
        assert!(!req.has_lapsed(now + Duration::minutes(11), Duration::hours(24)));
        // The overall TTL still bounds it.
        assert!(req.has_lapsed(now + Duration::hours(25), Duration::hours(24)));
    }

    #[test]
    fn test_terminal_status_never_lapses() {
        let now = Utc::now();
        let mut req = request(now, Duration::minutes(10));
        req.status = SignupStatus::Completed;
        assert!(!req.has_lapsed(now + Duration::days(30), Duration::hours(24)));
    }
}
