use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use ucg_core::platforms::webform::TaxonomyConfig;
use ucg_core::platforms::whatsapp::creds::{DEFAULT_GRAPH_BASE, DEFAULT_MEDIA_MAX_BYTES};
use ucg_core::{DEFAULT_TIMEOUT_SECS, EndpointTarget, HttpSettings, RouterConfig};
use ucg_transform::{CeemisConfig, CpimsConfig, EemisConfig};

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_SERVICE_NAME: &str = "ucg-gateway";
pub const DEFAULT_ORG_ID: &str = "default";
pub const DEFAULT_REFRESH_GRACE_SECS: i64 = 24 * 60 * 60;

/// Settings for one WhatsApp Business number and its seeded credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberConfig {
    pub verify_token: Option<String>,
    pub app_secret: Option<String>,
    pub phone_number_id: String,
    pub business_id: Option<String>,
    pub access_token: Option<String>,
    pub token_expiry: Option<i64>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub org_id: String,
}

impl Default for NumberConfig {
    fn default() -> Self {
        Self {
            verify_token: None,
            app_secret: None,
            phone_number_id: String::new(),
            business_id: None,
            access_token: None,
            token_expiry: None,
            client_id: None,
            client_secret: None,
            org_id: DEFAULT_ORG_ID.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    pub service_name: String,
    pub jwt_secret: String,
    pub http: HttpSettings,
    pub media_max_bytes: u64,
    pub router: RouterConfig,
    pub whatsapp_api_base: String,
    pub whatsapp: NumberConfig,
    pub mamacare: NumberConfig,
    pub token_refresh_grace_secs: i64,
    pub ceemis: CeemisConfig,
    pub eemis: EemisConfig,
    pub cpims: CpimsConfig,
    pub taxonomy: TaxonomyConfig,
}

impl GatewayConfig {
    /// Defaults for every optional key.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            jwt_secret: jwt_secret.into(),
            http: HttpSettings::default(),
            media_max_bytes: DEFAULT_MEDIA_MAX_BYTES,
            router: RouterConfig::default(),
            whatsapp_api_base: DEFAULT_GRAPH_BASE.to_string(),
            whatsapp: NumberConfig::default(),
            mamacare: NumberConfig::default(),
            token_refresh_grace_secs: DEFAULT_REFRESH_GRACE_SECS,
            ceemis: CeemisConfig::default(),
            eemis: EemisConfig::default(),
            cpims: CpimsConfig::default(),
            taxonomy: TaxonomyConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let jwt_secret = get("JWT_SECRET").ok_or_else(|| anyhow!("JWT_SECRET must be set"))?;
        let mut cfg = Self::new(jwt_secret);

        cfg.bind = get("BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse()
            .context("invalid BIND address")?;
        if let Some(name) = get("SERVICE_NAME") {
            cfg.service_name = name;
        }
        cfg.http = HttpSettings {
            timeout: Duration::from_secs(number(
                get("HTTP_TIMEOUT_SECS"),
                "HTTP_TIMEOUT_SECS",
                DEFAULT_TIMEOUT_SECS,
            )?),
            verify_tls: !flag(get("DISABLE_SSL_VERIFICATION")),
        };
        cfg.media_max_bytes = number(
            get("MEDIA_MAX_BYTES"),
            "MEDIA_MAX_BYTES",
            DEFAULT_MEDIA_MAX_BYTES,
        )?;
        cfg.router = RouterConfig {
            cases: get("CASES_ENDPOINT_URL")
                .map(|url| EndpointTarget::new(url, get("CASES_ENDPOINT_TOKEN"))),
            messaging: get("MESSAGING_ENDPOINT_URL")
                .map(|url| EndpointTarget::new(url, get("MESSAGING_ENDPOINT_TOKEN"))),
        };

        if let Some(base) = get("WHATSAPP_API_BASE") {
            cfg.whatsapp_api_base = base;
        }
        cfg.whatsapp = NumberConfig {
            verify_token: get("WHATSAPP_VERIFY_TOKEN"),
            app_secret: get("WHATSAPP_APP_SECRET"),
            phone_number_id: get("WHATSAPP_PHONE_NUMBER_ID").unwrap_or_default(),
            business_id: get("WHATSAPP_BUSINESS_ID"),
            access_token: get("WHATSAPP_ACCESS_TOKEN"),
            token_expiry: get("WHATSAPP_TOKEN_EXPIRY")
                .map(|v| v.parse::<i64>())
                .transpose()
                .context("invalid WHATSAPP_TOKEN_EXPIRY")?,
            client_id: get("WHATSAPP_CLIENT_ID"),
            client_secret: get("WHATSAPP_CLIENT_SECRET"),
            org_id: get("WHATSAPP_ORG_ID").unwrap_or_else(|| DEFAULT_ORG_ID.to_string()),
        };
        cfg.mamacare = NumberConfig {
            verify_token: get("MAMACARE_VERIFY_TOKEN"),
            app_secret: get("MAMACARE_APP_SECRET"),
            phone_number_id: get("MAMACARE_PHONE_NUMBER_ID").unwrap_or_default(),
            access_token: get("MAMACARE_ACCESS_TOKEN"),
            ..NumberConfig::default()
        };
        cfg.token_refresh_grace_secs = number(
            get("TOKEN_REFRESH_GRACE_SECS"),
            "TOKEN_REFRESH_GRACE_SECS",
            DEFAULT_REFRESH_GRACE_SECS,
        )?;

        if let Some(base_url) = get("CEEMIS_BASE_URL") {
            cfg.ceemis.base_url = base_url;
        }
        if let Some(base_url) = get("EEMIS_BASE_URL") {
            cfg.eemis.base_url = base_url;
        }
        if let Some(endpoint) = get("CPIMS_ENDPOINT") {
            cfg.cpims.endpoint = endpoint;
        }
        if let Some(endpoint) = get("CPIMS_GEO_ENDPOINT") {
            cfg.cpims.geo_endpoint = endpoint;
        }
        cfg.cpims.token = get("CPIMS_AUTH_TOKEN");
        cfg.cpims.default_area_code = get("CPIMS_DEFAULT_AREA_CODE");
        cfg.taxonomy = TaxonomyConfig {
            api_base: get("HELPLINE_API_BASE"),
            token: get("HELPLINE_API_TOKEN"),
        };
        Ok(cfg)
    }
}

fn flag(value: Option<String>) -> bool {
    value
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn number<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw.parse().with_context(|| format!("invalid {key}: {raw}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let cfg = GatewayConfig::from_lookup(lookup(&[("JWT_SECRET", "s")])).unwrap();
        assert_eq!(cfg.bind.to_string(), DEFAULT_BIND);
        assert_eq!(cfg.service_name, DEFAULT_SERVICE_NAME);
        assert_eq!(cfg.http.timeout, Duration::from_secs(30));
        assert!(cfg.http.verify_tls);
        assert_eq!(cfg.media_max_bytes, 16_777_216);
        assert_eq!(cfg.whatsapp.org_id, "default");
        assert_eq!(cfg.cpims.endpoint, "https://test.cpims.net/api/v1/crs/");
        assert!(cfg.router.cases.is_none());
        assert!(cfg.taxonomy.token.is_none());
    }

    #[test]
    fn missing_secret_fails() {
        let err = GatewayConfig::from_lookup(lookup(&[("JWT_SECRET", "  ")])).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn flags_and_endpoints_are_read() {
        let cfg = GatewayConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("DISABLE_SSL_VERIFICATION", "Yes"),
            ("CASES_ENDPOINT_URL", "https://cases.example/api/"),
            ("CASES_ENDPOINT_TOKEN", "tok"),
            ("MESSAGING_ENDPOINT_URL", "https://msg.example/in"),
            ("CPIMS_AUTH_TOKEN", "cp"),
            ("WHATSAPP_TOKEN_EXPIRY", "1900000000"),
        ]))
        .unwrap();
        assert!(!cfg.http.verify_tls);
        let cases = cfg.router.cases.unwrap();
        assert_eq!(cases.bearer.as_deref(), Some("tok"));
        assert!(cfg.router.messaging.unwrap().bearer.is_none());
        assert_eq!(cfg.cpims.token.as_deref(), Some("cp"));
        assert_eq!(cfg.whatsapp.token_expiry, Some(1_900_000_000));
    }

    #[test]
    fn bad_numbers_fail_with_context() {
        let err = GatewayConfig::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("HTTP_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("HTTP_TIMEOUT_SECS"));

        let err = GatewayConfig::from_lookup(lookup(&[("JWT_SECRET", "s"), ("BIND", "nowhere")]))
            .unwrap_err();
        assert!(err.to_string().contains("BIND"));
    }
}
