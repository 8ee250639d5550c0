//! Per-organisation platform credentials and the scoped token manager that
//! keeps them fresh.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Lifetime granted to an exchanged long-lived token.
pub const TOKEN_LIFETIME_SECS: i64 = 60 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformCredentials {
    pub org_id: String,
    pub platform: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub access_token: String,
    /// Unix seconds; `None` when the token never expires.
    #[serde(default)]
    pub token_expiry: Option<i64>,
    #[serde(default)]
    pub phone_number_id: Option<String>,
    #[serde(default)]
    pub business_id: Option<String>,
}

impl PlatformCredentials {
    pub fn new(
        org_id: impl Into<String>,
        platform: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            platform: platform.into(),
            client_id: None,
            client_secret: None,
            access_token: access_token.into(),
            token_expiry: None,
            phone_number_id: None,
            business_id: None,
        }
    }

    pub fn expires_within(&self, now: i64, grace_secs: i64) -> bool {
        self.token_expiry
            .map(|expiry| expiry - now <= grace_secs)
            .unwrap_or(false)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("network: {0}")]
    Network(String),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("no {platform} credentials for organisation {org_id}")]
    MissingCredentials { platform: String, org_id: String },
    #[error("token exchange failed: {0}")]
    Exchange(String),
}

impl UpstreamError {
    /// Errors that a refreshed token may cure.
    pub fn is_auth_scoped(&self) -> bool {
        match self {
            UpstreamError::Status { status: 401, .. } => true,
            UpstreamError::Status { status: 400 | 403, body } => {
                body.contains("OAuthException") || body.contains("\"code\":190")
            }
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::Network(err.to_string())
    }
}

/// Lock-free credential reads keyed by `(platform, org_id)`.
#[derive(Default)]
pub struct CredentialStore {
    inner: DashMap<(String, String), Arc<PlatformCredentials>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, platform: &str, org_id: &str) -> Option<Arc<PlatformCredentials>> {
        self.inner
            .get(&(platform.to_string(), org_id.to_string()))
            .map(|c| Arc::clone(c.value()))
    }

    pub fn put(&self, creds: PlatformCredentials) -> Arc<PlatformCredentials> {
        let creds = Arc::new(creds);
        self.inner.insert(
            (creds.platform.clone(), creds.org_id.clone()),
            Arc::clone(&creds),
        );
        creds
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangedToken {
    pub access_token: String,
    pub expires_in: Option<i64>,
}

/// Upstream endpoint trading a token for a fresh long-lived one.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, current: &PlatformCredentials) -> Result<ExchangedToken, UpstreamError>;
}

/// Resolves a valid token per organisation and serialises refreshes behind a
/// per-org mutex.
pub struct TokenManager {
    platform: String,
    store: Arc<CredentialStore>,
    exchanger: Arc<dyn TokenExchanger>,
    grace_secs: i64,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TokenManager {
    pub fn new(
        platform: impl Into<String>,
        store: Arc<CredentialStore>,
        exchanger: Arc<dyn TokenExchanger>,
        grace_secs: i64,
    ) -> Self {
        Self {
            platform: platform.into(),
            store,
            exchanger,
            grace_secs,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    fn lock_for(&self, org_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(org_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    fn lookup(&self, org_id: &str) -> Result<Arc<PlatformCredentials>, UpstreamError> {
        self.store
            .get(&self.platform, org_id)
            .ok_or_else(|| UpstreamError::MissingCredentials {
                platform: self.platform.clone(),
                org_id: org_id.to_string(),
            })
    }

    /// Current credentials, proactively refreshed inside the grace window.
    pub async fn current(&self, org_id: &str) -> Result<Arc<PlatformCredentials>, UpstreamError> {
        let creds = self.lookup(org_id)?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        if !creds.expires_within(now, self.grace_secs) {
            return Ok(creds);
        }
        match self.refresh(org_id, &creds.access_token).await {
            Ok(fresh) => Ok(fresh),
            Err(err) => {
                warn!(error = %err, org_id, platform = %self.platform, "proactive token refresh failed; using current token");
                Ok(creds)
            }
        }
    }

    /// Exchanges `stale_token` unless another caller already replaced it.
    pub async fn refresh(
        &self,
        org_id: &str,
        stale_token: &str,
    ) -> Result<Arc<PlatformCredentials>, UpstreamError> {
        let lock = self.lock_for(org_id);
        let _guard = lock.lock().await;

        let creds = self.lookup(org_id)?;
        if creds.access_token != stale_token {
            return Ok(creds);
        }
        let exchanged = self.exchanger.exchange(&creds).await?;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut updated = (*creds).clone();
        updated.access_token = exchanged.access_token;
        updated.token_expiry = Some(now + exchanged.expires_in.unwrap_or(TOKEN_LIFETIME_SECS));
        info!(org_id, platform = %self.platform, "access token refreshed");
        Ok(self.store.put(updated))
    }

    /// Stores client credentials and forces an exchange.
    pub async fn bootstrap(
        &self,
        org_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Arc<PlatformCredentials>, UpstreamError> {
        let current = {
            let lock = self.lock_for(org_id);
            let _guard = lock.lock().await;
            let mut creds = self
                .store
                .get(&self.platform, org_id)
                .map(|c| (*c).clone())
                .unwrap_or_else(|| PlatformCredentials::new(org_id, &self.platform, ""));
            creds.client_id = Some(client_id.to_string());
            creds.client_secret = Some(client_secret.to_string());
            self.store.put(creds)
        };
        self.refresh(org_id, &current.access_token).await
    }

    /// Calls `f` with a valid token; on an auth-scoped failure refreshes once
    /// and retries.
    pub async fn with_valid_token<T, F, Fut>(&self, org_id: &str, f: F) -> Result<T, UpstreamError>
    where
        F: Fn(Arc<PlatformCredentials>) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let creds = self.current(org_id).await?;
        match f(Arc::clone(&creds)).await {
            Err(err) if err.is_auth_scoped() => {
                warn!(error = %err, org_id, platform = %self.platform, "auth-scoped upstream error; refreshing token");
                let fresh = self.refresh(org_id, &creds.access_token).await?;
                f(fresh).await
            }
            other => other,
        }
    }
}
