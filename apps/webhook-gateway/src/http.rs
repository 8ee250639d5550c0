use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{MethodRouter, get, post},
};
use security::require_org;
use tower_http::cors::CorsLayer;

use crate::reqid::with_request_id;
use crate::state::AppState;
use crate::{auth, read, webhook};

type Shared = Arc<AppState>;

/// Registers `path` both with and without its trailing slash.
fn both(router: Router<Shared>, path: &str, handler: MethodRouter<Shared>) -> Router<Shared> {
    let bare = path.trim_end_matches('/');
    router
        .route(bare, handler.clone())
        .route(&format!("{bare}/"), handler)
}

fn webform_routes() -> Router<Shared> {
    let mut router = Router::new();
    router = both(router, "/auth/request-verification/", post(auth::request_verification));
    router = both(router, "/auth/verify-otp/", post(auth::verify_otp));
    router = both(router, "/auth/token/", post(auth::issue_token));
    router = both(router, "/categories/", get(read::categories));
    router = both(router, "/locations/export/", get(read::locations));
    router = both(router, "/case-categories/export/", get(read::case_categories));
    router
}

pub fn build_router(state: Shared) -> Router {
    let webhook = get(webhook::verify).post(webhook::receive);
    let router = both(Router::new(), "/webhook/{platform}/", webhook)
        .route("/healthz", get(|| async { "ok" }))
        .nest("/webform", webform_routes());

    router
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.gate),
            require_org,
        ))
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(with_request_id))
        .with_state(state)
}
