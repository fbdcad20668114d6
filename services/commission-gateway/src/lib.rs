//! Commission Gateway
//!
//! HTTP front for the ride-core commission engine. Stateless apart from
//! the metrics registry; every request is a pure calculation.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, missing_debug_implementations)]

pub mod error;
pub mod models;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use error::GatewayError;
use models::{ApiResponse, CalculateRequest, CommissionData, HealthResponse};
use ride_core::{commission, Metrics};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Service name reported by `/health`
pub const SERVICE_NAME: &str = "commission-gateway";

/// Gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Socket to bind
    pub listen_addr: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Defaults overridden by `GATEWAY_LISTEN_ADDR`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("GATEWAY_LISTEN_ADDR") {
            if !addr.trim().is_empty() {
                config.listen_addr = addr;
            }
        }
        config
    }
}

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    /// Process metrics
    pub metrics: Arc<Metrics>,
}

/// All gateway routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/commission/calculate", post(calculate_commission))
        .with_state(state)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    let body = state
        .metrics
        .encode()
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

async fn calculate_commission(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<ApiResponse<CommissionData>>, GatewayError> {
    let request = CalculateRequest::parse(&body)?;
    let fare = request.fare()?;
    let metrics = request.driver_metrics()?;

    let output = commission::compute(fare, &metrics)?;
    state.metrics.record_commission();

    info!(
        driver_id = %request.driver_id,
        tier = %output.tier,
        fare = %output.fare,
        commission = %output.commission,
        "Commission calculated"
    );

    Ok(Json(ApiResponse::ok(CommissionData::from(output))))
}
