//! Read-only client for the helpline taxonomy (case categories and the
//! location tree) used by the public web-form surfaces.
//!
//! Upstream rows are positional arrays: id `[0]`, name `[5]`, full path
//! `[6]`, parent `[8]`. The full path is `^`-separated from the root.

use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::message::{iso_timestamp, now_seconds};

pub const CATEGORY_ROOT: &str = "362557";
pub const LOCATION_ROOT: &str = "88";
pub const MAX_DEPTH: usize = 8;

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("Missing API configuration")]
    MissingConfiguration,
    #[error("API error: {0}")]
    Upstream(u16),
    #[error("network: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonomyConfig {
    pub api_base: Option<String>,
    pub token: Option<String>,
}

/// Which tree an export walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Export {
    Locations,
    CaseCategories,
}

impl Export {
    pub fn root(&self) -> &'static str {
        match self {
            Export::Locations => LOCATION_ROOT,
            Export::CaseCategories => CATEGORY_ROOT,
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            Export::Locations => "locations",
            Export::CaseCategories => "categories",
        }
    }

    fn hierarchy_key(&self) -> &'static str {
        match self {
            Export::Locations => "location_hierarchy",
            Export::CaseCategories => "category_hierarchy",
        }
    }

    /// Level name from the number of non-empty path segments.
    pub fn level_name(&self, full_path: &str) -> String {
        let depth = full_path.split('^').filter(|s| !s.is_empty()).count();
        let position = depth.saturating_sub(1);
        let named = match self {
            Export::Locations => [
                "region",
                "district",
                "county",
                "subcounty",
                "parish",
                "village",
                "constituency",
            ]
            .get(position)
            .copied(),
            Export::CaseCategories => ["category", "subcategory", "subsubcategory", "type", "subtype"]
                .get(position)
                .copied(),
        };
        match (named, self) {
            (Some(name), _) => name.to_string(),
            (None, Export::Locations) => "unknown".to_string(),
            (None, Export::CaseCategories) => format!("level_{position}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonomyNode {
    pub id: Value,
    pub name: Value,
    pub level: Option<String>,
    pub parent_id: Value,
    pub full_path: Option<String>,
    pub children: Vec<TaxonomyNode>,
}

impl TaxonomyNode {
    fn count(nodes: &[TaxonomyNode]) -> usize {
        nodes
            .iter()
            .map(|node| 1 + TaxonomyNode::count(&node.children))
            .sum()
    }
}

fn column(row: &Value, index: usize) -> Value {
    row.get(index).cloned().unwrap_or(Value::Null)
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct TaxonomyClient {
    http: reqwest::Client,
    config: TaxonomyConfig,
}

impl TaxonomyClient {
    pub fn new(http: reqwest::Client, config: TaxonomyConfig) -> Self {
        Self { http, config }
    }

    fn endpoint(&self) -> Result<(&str, &str), TaxonomyError> {
        match (&self.config.api_base, &self.config.token) {
            (Some(base), Some(token)) if !base.is_empty() && !token.is_empty() => {
                Ok((base.trim_end_matches('/'), token.as_str()))
            }
            _ => Err(TaxonomyError::MissingConfiguration),
        }
    }

    async fn fetch(&self, id: &str) -> Result<Value, TaxonomyError> {
        let (base, token) = self.endpoint()?;
        let url = format!("{base}/categories/{id}");
        debug!(%url, "fetching taxonomy node");
        let response = self.http.get(&url).bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), id, "taxonomy upstream error");
            return Err(TaxonomyError::Upstream(status.as_u16()));
        }
        Ok(response.json::<Value>().await?)
    }

    /// Top-level categories, or the children of `parent`.
    pub async fn categories(&self, parent: Option<&str>) -> Result<Value, TaxonomyError> {
        let data = self.fetch(parent.unwrap_or(CATEGORY_ROOT)).await?;
        let rows = |key: &str| {
            data.get(key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };
        let subcategories = rows("subcategories");

        if let Some(parent) = parent {
            let children: Vec<Value> = subcategories
                .iter()
                .map(|row| {
                    json!({
                        "id": column(row, 0),
                        "name": column(row, 5),
                        "parent_id": column(row, 8),
                    })
                })
                .collect();
            return Ok(json!({
                "status": "success",
                "parent_id": parent,
                "subcategories": children,
            }));
        }

        let categories: Vec<Value> = rows("categories")
            .iter()
            .map(|category| {
                let id = column(category, 0);
                let children: Vec<Value> = subcategories
                    .iter()
                    .filter(|sub| sub.get(8) == Some(&id))
                    .map(|sub| json!({"id": column(sub, 0), "name": column(sub, 5)}))
                    .collect();
                json!({
                    "id": id,
                    "name": column(category, 5),
                    "full_path": column(category, 6),
                    "subcategories": children,
                })
            })
            .collect();
        Ok(json!({"status": "success", "categories": categories}))
    }

    fn expand<'a>(&'a self, export: Export, data: Value, depth: usize) -> BoxFuture<'a, Vec<TaxonomyNode>> {
        async move {
            let rows = data
                .get("subcategories")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let mut nodes = Vec::with_capacity(rows.len());
            for (index, row) in rows.iter().enumerate() {
                let node_id = column(row, 0);
                let Some(child_id) = id_text(&node_id) else {
                    warn!(index, depth, "taxonomy row without id skipped");
                    continue;
                };
                let full_path = row
                    .get(6)
                    .and_then(Value::as_str)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string);
                let children = if depth + 1 >= MAX_DEPTH {
                    warn!(id = %child_id, depth, "taxonomy depth limit reached");
                    Vec::new()
                } else {
                    match self.fetch(&child_id).await {
                        Ok(child) => self.expand(export, child, depth + 1).await,
                        Err(err) => {
                            warn!(error = %err, id = %child_id, "taxonomy branch skipped");
                            Vec::new()
                        }
                    }
                };
                nodes.push(TaxonomyNode {
                    id: node_id,
                    name: column(row, 5),
                    level: full_path.as_deref().map(|p| export.level_name(p)),
                    parent_id: column(row, 8),
                    full_path,
                    children,
                });
            }
            nodes
        }
        .boxed()
    }

    /// Full hierarchy below the export root. Only the root fetch is fatal;
    /// a failing branch is pruned.
    pub async fn export(&self, export: Export) -> Result<Value, TaxonomyError> {
        let started = Instant::now();
        let root = self.fetch(export.root()).await?;
        let hierarchy = self.expand(export, root, 0).await;
        let duration = started.elapsed().as_secs_f64();
        let total = TaxonomyNode::count(&hierarchy);
        info!(kind = export.noun(), total, duration, "taxonomy export finished");

        let mut body = serde_json::Map::new();
        body.insert("status".into(), "success".into());
        body.insert("timestamp".into(), iso_timestamp(now_seconds()).into());
        body.insert(
            "duration_seconds".into(),
            json!((duration * 100.0).round() / 100.0),
        );
        body.insert(format!("total_{}", export.noun()), total.into());
        body.insert(
            export.hierarchy_key().into(),
            serde_json::to_value(&hierarchy).unwrap_or(Value::Array(Vec::new())),
        );
        Ok(Value::Object(body))
    }
}
