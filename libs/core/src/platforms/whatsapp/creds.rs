use async_trait::async_trait;
use serde::Deserialize;

use crate::credentials::{ExchangedToken, PlatformCredentials, TokenExchanger, UpstreamError};

pub const DEFAULT_GRAPH_BASE: &str = "https://graph.facebook.com/v18.0";
pub const DEFAULT_MEDIA_MAX_BYTES: u64 = 16 * 1024 * 1024;

/// Static settings of one Meta-style WhatsApp number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhatsAppConfig {
    /// Platform tag stamped on parsed messages (`whatsapp`, `mamacare`).
    pub platform: String,
    pub verify_token: Option<String>,
    pub app_secret: Option<String>,
    pub phone_number_id: String,
    pub api_base: String,
    /// Organisation whose credentials back this number.
    pub org_id: String,
    pub media_max_bytes: u64,
}

impl WhatsAppConfig {
    pub fn new(platform: impl Into<String>, phone_number_id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            verify_token: None,
            app_secret: None,
            phone_number_id: phone_number_id.into(),
            api_base: DEFAULT_GRAPH_BASE.to_string(),
            org_id: "default".to_string(),
            media_max_bytes: DEFAULT_MEDIA_MAX_BYTES,
        }
    }

    pub fn api_base(&self) -> &str {
        self.api_base.trim_end_matches('/')
    }

    pub fn is_mock(&self) -> bool {
        self.api_base.starts_with("mock://")
    }
}

#[derive(Deserialize)]
struct ExchangeResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Graph `fb_exchange_token` grant.
pub struct GraphTokenExchanger {
    http: reqwest::Client,
    api_base: String,
}

impl GraphTokenExchanger {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TokenExchanger for GraphTokenExchanger {
    async fn exchange(&self, current: &PlatformCredentials) -> Result<ExchangedToken, UpstreamError> {
        let (Some(client_id), Some(client_secret)) = (&current.client_id, &current.client_secret)
        else {
            return Err(UpstreamError::Exchange(
                "client_id and client_secret are not configured".into(),
            ));
        };
        let response = self
            .http
            .get(format!("{}/oauth/access_token", self.api_base))
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("fb_exchange_token", current.access_token.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ExchangeResponse = serde_json::from_str(&body)
            .map_err(|err| UpstreamError::Exchange(format!("unexpected response: {err}")))?;
        Ok(ExchangedToken {
            access_token: parsed.access_token,
            expires_in: parsed.expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn exchanges_with_client_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/access_token"))
            .and(query_param("grant_type", "fb_exchange_token"))
            .and(query_param("fb_exchange_token", "short"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "long", "token_type": "bearer"})),
            )
            .mount(&server)
            .await;

        let exchanger = GraphTokenExchanger::new(reqwest::Client::new(), server.uri());
        let mut creds = PlatformCredentials::new("org", "whatsapp", "short");
        creds.client_id = Some("app".into());
        creds.client_secret = Some("secret".into());
        let token = exchanger.exchange(&creds).await.unwrap();
        assert_eq!(token.access_token, "long");
        assert_eq!(token.expires_in, None);
    }

    #[tokio::test]
    async fn missing_client_credentials_fail_fast() {
        let exchanger = GraphTokenExchanger::new(reqwest::Client::new(), "http://127.0.0.1:9");
        let creds = PlatformCredentials::new("org", "whatsapp", "short");
        assert!(matches!(
            exchanger.exchange(&creds).await,
            Err(UpstreamError::Exchange(_))
        ));
    }
}
