//! In-memory verification code store.
//!
//! Codes are keyed by normalized email, live for ten minutes and are
//! single-use. Reissuing replaces any outstanding code for the same
//! email. A mismatched guess leaves the entry in place so the merchant
//! can retry; expiry removes it on first detection.
//!
//! Codes do not survive a restart. That is acceptable here: a lost code
//! just means requesting a new one.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use relaylink_core::{Email, ResolvedIdentity};
use thiserror::Error;

/// How long an issued code stays valid.
const CODE_TTL: Duration = Duration::from_secs(10 * 60);

/// Character set for generated account passwords.
const PASSWORD_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*";

/// Why a code failed to verify.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsumeError {
    /// No outstanding code for this email.
    #[error("no verification code found")]
    NotFound,

    /// The code existed but its TTL elapsed.
    #[error("verification code expired")]
    Expired,

    /// The supplied code does not match the outstanding one.
    #[error("verification code does not match")]
    Mismatch,
}

struct VerificationEntry {
    code: String,
    issued_at: Instant,
    identity: ResolvedIdentity,
}

/// Store of outstanding verification codes.
pub struct VerificationStore {
    ttl: Duration,
    codes: Mutex<HashMap<String, VerificationEntry>>,
}

impl Default for VerificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationStore {
    /// Create a store with the standard ten-minute TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(CODE_TTL)
    }

    /// Create a store with a custom TTL.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            codes: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh code for an email, replacing any outstanding one.
    ///
    /// The resolved identity rides along with the entry so verification
    /// can hand it back without a second provider lookup.
    pub fn issue(&self, email: &Email, identity: ResolvedIdentity) -> String {
        let code = generate_verification_code();
        let mut codes = self.lock();
        codes.insert(
            email.normalized(),
            VerificationEntry {
                code: code.clone(),
                issued_at: Instant::now(),
                identity,
            },
        );
        code
    }

    /// Verify and consume a code.
    ///
    /// Success removes the entry; so does expiry. A mismatch keeps the
    /// entry so further attempts against the same code are possible.
    ///
    /// # Errors
    ///
    /// Returns `ConsumeError` describing why verification failed.
    pub fn consume(&self, email: &Email, code: &str) -> Result<ResolvedIdentity, ConsumeError> {
        let key = email.normalized();
        let mut codes = self.lock();

        let entry = codes.get(&key).ok_or(ConsumeError::NotFound)?;

        if entry.issued_at.elapsed() > self.ttl {
            codes.remove(&key);
            return Err(ConsumeError::Expired);
        }

        if entry.code != code {
            return Err(ConsumeError::Mismatch);
        }

        let entry = codes.remove(&key).ok_or(ConsumeError::NotFound)?;
        Ok(entry.identity)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VerificationEntry>> {
        self.codes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Generate a 6-digit verification code.
#[must_use]
pub fn generate_verification_code() -> String {
    let code: u32 = rand::rng().random_range(100_000..1_000_000);
    code.to_string()
}

/// Generate a random password for provider account creation.
#[must_use]
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..PASSWORD_CHARS.len());
            char::from(PASSWORD_CHARS[idx])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaylink_core::RelayUserId;

    fn email(s: &str) -> Email {
        Email::parse(s).unwrap()
    }

    fn identity(id: i64) -> ResolvedIdentity {
        ResolvedIdentity::Real(RelayUserId::new(id))
    }

    #[test]
    fn test_issue_and_consume_round_trip() {
        let store = VerificationStore::new();
        let addr = email("merchant@example.com");

        let code = store.issue(&addr, identity(42));
        let resolved = store.consume(&addr, &code).unwrap();
        assert_eq!(resolved.real_id().map(|id| id.as_i64()), Some(42));
    }

    #[test]
    fn test_consume_is_single_use() {
        let store = VerificationStore::new();
        let addr = email("merchant@example.com");

        let code = store.issue(&addr, identity(1));
        store.consume(&addr, &code).unwrap();
        assert_eq!(store.consume(&addr, &code), Err(ConsumeError::NotFound));
    }

    #[test]
    fn test_consume_unknown_email() {
        let store = VerificationStore::new();
        assert_eq!(
            store.consume(&email("nobody@example.com"), "123456"),
            Err(ConsumeError::NotFound)
        );
    }

    #[test]
    fn test_mismatch_keeps_entry() {
        let store = VerificationStore::new();
        let addr = email("merchant@example.com");

        let code = store.issue(&addr, identity(7));
        assert_eq!(store.consume(&addr, "000000"), Err(ConsumeError::Mismatch));
        // The real code still works after a bad guess
        assert!(store.consume(&addr, &code).is_ok());
    }

    #[test]
    fn test_expired_code_is_removed() {
        let store = VerificationStore::with_ttl(Duration::ZERO);
        let addr = email("merchant@example.com");

        let code = store.issue(&addr, identity(7));
        assert_eq!(store.consume(&addr, &code), Err(ConsumeError::Expired));
        // Gone entirely, not just rejected
        assert_eq!(store.consume(&addr, &code), Err(ConsumeError::NotFound));
    }

    #[test]
    fn test_reissue_replaces_code() {
        let store = VerificationStore::new();
        let addr = email("merchant@example.com");

        let first = store.issue(&addr, identity(1));
        let second = store.issue(&addr, identity(2));

        if first != second {
            assert_eq!(store.consume(&addr, &first), Err(ConsumeError::Mismatch));
        }
        let resolved = store.consume(&addr, &second).unwrap();
        assert_eq!(resolved.real_id().map(|id| id.as_i64()), Some(2));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let store = VerificationStore::new();
        let code = store.issue(&email("Merchant@Example.COM"), identity(9));
        assert!(store.consume(&email("merchant@example.com"), &code).is_ok());
    }

    #[test]
    fn test_degraded_identity_survives_round_trip() {
        let store = VerificationStore::new();
        let addr = email("merchant@example.com");

        let code = store.issue(&addr, ResolvedIdentity::Degraded);
        assert!(store.consume(&addr, &code).unwrap().is_degraded());
    }

    #[test]
    fn test_generate_verification_code_format() {
        let code = generate_verification_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_generate_password_length_and_charset() {
        let password = generate_password(20);
        assert_eq!(password.len(), 20);
        assert!(password.bytes().all(|b| PASSWORD_CHARS.contains(&b)));
    }
}
