//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;

/// Errors surfaced by the gateway
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Body is not the expected JSON shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Field present but unusable
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rejected or failed in the ride core
    #[error("{0}")]
    Core(#[from] ride_core::Error),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Transport status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Parse(_) | GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Core(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            GatewayError::Core(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        (
            status,
            Json(serde_json::json!({
                "success": false,
                "error": self.to_string(),
                "timestamp": Utc::now(),
            })),
        )
            .into_response()
    }
}
