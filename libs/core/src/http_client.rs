use std::time::Duration;

use tracing::warn;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Settings shared by every outbound HTTP client in the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub verify_tls: bool,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            verify_tls: true,
        }
    }
}

impl HttpSettings {
    pub fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        if !self.verify_tls {
            warn!("TLS certificate verification is disabled for outbound HTTP calls");
        }
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .danger_accept_invalid_certs(!self.verify_tls)
            .build()
    }
}
