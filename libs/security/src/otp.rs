//! One-time email verification codes.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use time::{Duration, OffsetDateTime};
use tracing::info;

/// How long an issued code stays valid.
pub const OTP_TTL: Duration = Duration::minutes(10);

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum OtpError {
    #[error("No pending verification found for this email")]
    NoPending,
    #[error("Verification has expired, please request a new code")]
    Expired,
    #[error("Invalid verification code")]
    Mismatch,
}

impl OtpError {
    pub fn status(&self) -> u16 {
        match self {
            OtpError::NoPending => 404,
            OtpError::Expired | OtpError::Mismatch => 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedOtp {
    pub email: String,
    pub code: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeState {
    Pending,
    Superseded,
    Verified,
}

#[derive(Debug, Clone)]
struct CodeRecord {
    code: String,
    expires_at: OffsetDateTime,
    state: CodeState,
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Issues a fresh code; earlier pending codes for the email are superseded.
    async fn issue(&self, email: &str) -> Result<IssuedOtp>;
    /// Checks `code` against the latest pending code and consumes it.
    async fn verify(&self, email: &str, code: &str) -> Result<(), OtpError>;
}

pub type SharedOtpStore = Arc<dyn OtpStore>;

pub struct MemoryOtpStore {
    ttl: Duration,
    codes: DashMap<String, Vec<CodeRecord>>,
}

impl Default for MemoryOtpStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOtpStore {
    pub fn new() -> Self {
        Self::with_ttl(OTP_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            codes: DashMap::new(),
        }
    }
}

fn generate_code() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000u32))
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl OtpStore for MemoryOtpStore {
    async fn issue(&self, email: &str) -> Result<IssuedOtp> {
        let code = generate_code();
        let expires_at = OffsetDateTime::now_utc() + self.ttl;
        let mut records = self.codes.entry(email_key(email)).or_default();
        for record in records.iter_mut() {
            if record.state == CodeState::Pending {
                record.state = CodeState::Superseded;
            }
        }
        records.push(CodeRecord {
            code: code.clone(),
            expires_at,
            state: CodeState::Pending,
        });
        Ok(IssuedOtp {
            email: email.to_string(),
            code,
            expires_at,
        })
    }

    async fn verify(&self, email: &str, code: &str) -> Result<(), OtpError> {
        let mut records = self
            .codes
            .get_mut(&email_key(email))
            .ok_or(OtpError::NoPending)?;
        let record = records
            .iter_mut()
            .rev()
            .find(|r| r.state == CodeState::Pending)
            .ok_or(OtpError::NoPending)?;
        if OffsetDateTime::now_utc() >= record.expires_at {
            return Err(OtpError::Expired);
        }
        if record.code != code.trim() {
            return Err(OtpError::Mismatch);
        }
        record.state = CodeState::Verified;
        Ok(())
    }
}

/// Delivers an issued code to its owner.
#[async_trait]
pub trait OtpNotifier: Send + Sync {
    async fn deliver(&self, otp: &IssuedOtp) -> Result<()>;
}

pub type SharedOtpNotifier = Arc<dyn OtpNotifier>;

/// Records that a code was issued. The code itself is never logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl OtpNotifier for LoggingNotifier {
    async fn deliver(&self, otp: &IssuedOtp) -> Result<()> {
        info!(email = %otp.email, expires_at = %otp.expires_at, "verification code issued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn codes_are_six_digits_and_single_use() {
        let store = MemoryOtpStore::new();
        let otp = store.issue("Ops@Example.org").await.unwrap();
        assert_eq!(otp.code.len(), 6);
        assert!(otp.code.chars().all(|c| c.is_ascii_digit()));

        assert_eq!(store.verify("ops@example.org", "not-it").await, Err(OtpError::Mismatch));
        store.verify("ops@example.org", &otp.code).await.unwrap();
        assert_eq!(
            store.verify("ops@example.org", &otp.code).await,
            Err(OtpError::NoPending)
        );
    }

    #[tokio::test]
    async fn reissue_supersedes_earlier_codes() {
        let store = MemoryOtpStore::new();
        let first = store.issue("a@b.org").await.unwrap();
        let second = loop {
            let next = store.issue("a@b.org").await.unwrap();
            if next.code != first.code {
                break next;
            }
        };
        assert_eq!(store.verify("a@b.org", &first.code).await, Err(OtpError::Mismatch));
        store.verify("a@b.org", &second.code).await.unwrap();
    }

    #[tokio::test]
    async fn expired_codes_are_refused() {
        let store = MemoryOtpStore::with_ttl(Duration::ZERO);
        let otp = store.issue("a@b.org").await.unwrap();
        assert_eq!(store.verify("a@b.org", &otp.code).await, Err(OtpError::Expired));
        assert_eq!(OtpError::Expired.status(), 400);
        assert_eq!(store.verify("nobody@b.org", "123456").await, Err(OtpError::NoPending));
    }
}
