//! Cached CPIMS geographic index.
//!
//! The full index is fetched once on first use and kept for the process
//! lifetime. Concurrent first lookups share a single request; a failed fetch
//! is not cached, so the next lookup tries again.

use dashmap::DashSet;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::rows::scalar;

#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("geo index request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("geo index returned status {0}")]
    Status(u16),
    #[error("geo index is not a JSON array")]
    Format,
}

/// Administrative level of an area in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaType {
    County,
    Constituency,
    Ward,
}

impl AreaType {
    pub fn code(&self) -> &'static str {
        match self {
            AreaType::County => "GPRV",
            AreaType::Constituency => "GDIS",
            AreaType::Ward => "GWRD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoArea {
    pub name: String,
    pub code: String,
    pub type_id: String,
}

impl GeoArea {
    fn from_value(value: &Value) -> Option<Self> {
        let name = value.get("area_name").map(scalar).unwrap_or_default();
        if name.is_empty() {
            return None;
        }
        let code = value
            .get("area_code")
            .or_else(|| value.get("area_id"))
            .map(scalar)
            .unwrap_or_default();
        Some(Self {
            name,
            code,
            type_id: value.get("area_type_id").map(scalar).unwrap_or_default(),
        })
    }
}

pub struct GeoIndex {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    default_code: Option<String>,
    areas: OnceCell<Vec<GeoArea>>,
    misses: DashSet<String>,
}

impl GeoIndex {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        token: Option<String>,
        default_code: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            token,
            default_code: default_code.filter(|c| !c.trim().is_empty()),
            areas: OnceCell::new(),
            misses: DashSet::new(),
        }
    }

    async fn areas(&self) -> Result<&[GeoArea], GeoError> {
        self.areas
            .get_or_try_init(|| self.fetch())
            .await
            .map(Vec::as_slice)
    }

    async fn fetch(&self) -> Result<Vec<GeoArea>, GeoError> {
        info!(endpoint = %self.endpoint, "fetching CPIMS geo index");
        let mut request = self.http.get(&self.endpoint);
        if let Some(token) = &self.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Token {token}"));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GeoError::Status(status.as_u16()));
        }
        let body: Value = response.json().await?;
        let rows = body.as_array().ok_or(GeoError::Format)?;
        let areas: Vec<GeoArea> = rows.iter().filter_map(GeoArea::from_value).collect();
        info!(areas = areas.len(), "CPIMS geo index cached");
        Ok(areas)
    }

    /// Area code for `name`, preferring an entry of the given type and
    /// falling back to any entry with that name.
    pub async fn lookup(&self, name: &str, area_type: AreaType) -> Option<String> {
        let wanted = name.trim();
        if wanted.is_empty() {
            return None;
        }
        let areas = match self.areas().await {
            Ok(areas) => areas,
            Err(err) => {
                warn!(error = %err, "CPIMS geo index unavailable");
                return None;
            }
        };
        let named = || areas.iter().filter(|a| a.name.trim().eq_ignore_ascii_case(wanted));
        named()
            .find(|a| a.type_id == area_type.code())
            .or_else(|| named().next())
            .map(|a| a.code.clone())
    }

    /// Resolved code, else the configured default, else the name itself.
    /// Each distinct miss is warned about once.
    pub async fn resolve(&self, name: &str, area_type: AreaType) -> Option<String> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        if let Some(code) = self.lookup(name, area_type).await {
            debug!(area = name, code = %code, "geo area resolved");
            return Some(code);
        }
        if self.misses.insert(name.to_lowercase()) {
            warn!(
                area = name,
                area_type = area_type.code(),
                "area not found in CPIMS geo index"
            );
        }
        Some(
            self.default_code
                .clone()
                .unwrap_or_else(|| name.to_string()),
        )
    }
}
