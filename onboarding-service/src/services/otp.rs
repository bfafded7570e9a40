//! Pure OTP primitives: code generation, hashing, verification, cooldown.
//!
//! Every function takes the current time as an argument, so the verifier and
//! the cooldown guard are deterministic and unit-testable without mocking a
//! clock. No external calls happen here.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Fixed code length. Codes are compared as strings so leading zeros matter.
pub const OTP_LENGTH: usize = 6;

/// Outcome of checking a submitted code against stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Match,
    Expired,
    Mismatch,
}

/// Generate a random numeric OTP of `length` digits.
pub fn generate_otp(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| rng.gen_range(0..10).to_string())
        .collect()
}

/// Hash an OTP code for storage. Codes are never persisted in plaintext.
pub fn hash_otp(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a submitted code against the stored hash and expiry.
///
/// Expiry wins over mismatch: a correct-but-stale code reports `Expired`.
pub fn verify(
    stored_hash: &str,
    expires_at: DateTime<Utc>,
    submitted: &str,
    now: DateTime<Utc>,
) -> MatchResult {
    if now > expires_at {
        return MatchResult::Expired;
    }
    let submitted_hash = hash_otp(submitted);
    if submitted_hash.as_bytes().ct_eq(stored_hash.as_bytes()).into() {
        MatchResult::Match
    } else {
        MatchResult::Mismatch
    }
}

/// Cooldown guard: true once at least `cooldown` has elapsed since the last
/// dispatch on this channel.
pub fn can_resend(last_sent_at: DateTime<Utc>, now: DateTime<Utc>, cooldown: Duration) -> bool {
    now - last_sent_at >= cooldown
}

/// Seconds until a resend is allowed; zero when already allowed.
pub fn resend_available_in(
    last_sent_at: DateTime<Utc>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> i64 {
    (last_sent_at + cooldown - now).num_seconds().max(0)
}

/// Seconds left in the code's validity window; zero when lapsed.
pub fn expires_in(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expires_at - now).num_seconds().max(0)
}
