//! Unauthenticated taxonomy reads for web-form clients.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::error;
use ucg_core::platforms::webform::{Export, TaxonomyError};

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CategoryQuery {
    pub parent: Option<String>,
}

fn reply(result: Result<Value, TaxonomyError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(err) => {
            let status = match &err {
                TaxonomyError::MissingConfiguration => StatusCode::SERVICE_UNAVAILABLE,
                TaxonomyError::Upstream(_) | TaxonomyError::Network(_) => StatusCode::BAD_GATEWAY,
            };
            error!(error = %err, "taxonomy read failed");
            (
                status,
                Json(json!({ "status": "error", "message": err.to_string() })),
            )
                .into_response()
        }
    }
}

pub async fn categories(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CategoryQuery>,
) -> Response {
    let parent = query.parent.as_deref().filter(|p| !p.is_empty());
    reply(state.webform.taxonomy().categories(parent).await)
}

pub async fn locations(State(state): State<Arc<AppState>>) -> Response {
    reply(state.webform.taxonomy().export(Export::Locations).await)
}

pub async fn case_categories(State(state): State<Arc<AppState>>) -> Response {
    reply(state.webform.taxonomy().export(Export::CaseCategories).await)
}
