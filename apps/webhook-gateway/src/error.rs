use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use security::OtpError;
use tracing::{error, warn};
use ucg_core::{AdapterError, RegistryError};

/// Request-level failures of the gateway surface.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),
    #[error("{message}")]
    Auth { status: StatusCode, message: String },
    #[error("{0}")]
    Unavailable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownPlatform(_) => StatusCode::NOT_FOUND,
            ApiError::Auth { status, .. } => *status,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownPlatform(name) => ApiError::UnknownPlatform(name),
        }
    }
}

impl From<AdapterError> for ApiError {
    fn from(err: AdapterError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<OtpError> for ApiError {
    fn from(err: OtpError) -> Self {
        ApiError::Auth {
            status: StatusCode::from_u16(err.status()).unwrap_or(StatusCode::BAD_REQUEST),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(err) => {
                error!(error = ?err, "request failed");
                "Processing failed".to_string()
            }
            ApiError::Validation(message) => {
                warn!(%message, "request rejected");
                message.clone()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "status": "error", "message": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn internal_detail_stays_in_logs() {
        let (status, json) = body(ApiError::Internal(anyhow::anyhow!("db password wrong"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["message"], "Processing failed");
    }

    #[tokio::test]
    async fn registry_miss_is_not_found() {
        let (status, json) =
            body(RegistryError::UnknownPlatform("telegram".into()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["message"], "Unknown platform: telegram");
    }

    #[tokio::test]
    async fn otp_failures_keep_their_status() {
        let (status, json) = body(OtpError::NoPending.into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["message"], "No pending verification found for this email");
        let (status, _) = body(OtpError::Mismatch.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn adapter_errors_are_validation_failures() {
        let (status, json) =
            body(AdapterError::InvalidSignature("bad digest".into()).into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "error");
        assert!(json["message"].as_str().unwrap().starts_with("INVALID_SIGNATURE"));
    }
}
