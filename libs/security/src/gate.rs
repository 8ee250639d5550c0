//! Bearer-token gate for the web-form namespace.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::jwt::OrgTokenSigner;
use crate::org::SharedOrganisationStore;

const PROTECTED_NAMESPACE: &str = "/webform/";
const AUTH_PATHS: [&str; 3] = [
    "/webform/auth/request-verification/",
    "/webform/auth/verify-otp/",
    "/webform/auth/token/",
];

/// Organisation attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgContext {
    pub org_id: String,
    pub org_name: String,
    pub org_email: String,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum GateRejection {
    #[error("Authentication required. Please provide a valid bearer token.")]
    MissingBearer,
    #[error("Invalid or expired token.")]
    InvalidToken,
    #[error("Organization not found.")]
    UnknownOrganisation,
    #[error("Organization access has been revoked.")]
    Revoked,
    #[error("Authentication error.")]
    Internal,
}

impl GateRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            GateRejection::Revoked => StatusCode::FORBIDDEN,
            GateRejection::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        let body = json!({ "status": "error", "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

/// Whether a request must carry an organisation token. Auth bootstrap
/// endpoints and read-only GETs stay public.
pub fn requires_auth(method: &Method, path: &str) -> bool {
    let lowered = path.to_ascii_lowercase();
    let normalized = if lowered.ends_with('/') {
        lowered
    } else {
        format!("{lowered}/")
    };
    if !normalized.contains(PROTECTED_NAMESPACE) {
        return false;
    }
    if AUTH_PATHS.iter().any(|p| normalized.ends_with(p)) {
        return false;
    }
    method != Method::GET
}

pub struct AuthGate {
    signer: OrgTokenSigner,
    organisations: SharedOrganisationStore,
}

impl AuthGate {
    pub fn new(signer: OrgTokenSigner, organisations: SharedOrganisationStore) -> Self {
        Self {
            signer,
            organisations,
        }
    }

    pub fn signer(&self) -> &OrgTokenSigner {
        &self.signer
    }

    pub fn organisations(&self) -> &SharedOrganisationStore {
        &self.organisations
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<OrgContext, GateRejection> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(GateRejection::MissingBearer)?;

        let claims = self.signer.verify(token).map_err(|err| {
            debug!(error = %err, "organisation token rejected");
            GateRejection::InvalidToken
        })?;

        let org = match self.organisations.get(&claims.org_id).await {
            Ok(Some(org)) => org,
            Ok(None) => return Err(GateRejection::UnknownOrganisation),
            Err(err) => {
                error!(error = %err, "organisation lookup failed");
                return Err(GateRejection::Internal);
            }
        };
        if !org.is_active {
            warn!(org_id = %org.id, "request from deactivated organisation");
            return Err(GateRejection::Revoked);
        }
        Ok(OrgContext {
            org_id: org.id.to_string(),
            org_name: org.name,
            org_email: org.email,
        })
    }
}

/// Middleware for `axum::middleware::from_fn_with_state`.
pub async fn require_org(
    State(gate): State<Arc<AuthGate>>,
    mut request: Request,
    next: Next,
) -> Response {
    if !requires_auth(request.method(), request.uri().path()) {
        return next.run(request).await;
    }
    match gate.authenticate(request.headers()).await {
        Ok(org) => {
            request.extensions_mut().insert(org);
            next.run(request).await
        }
        Err(rejection) => rejection.into_response(),
    }
}
