//! Wire models for the commission endpoint

use crate::error::GatewayError;
use chrono::{DateTime, Utc};
use ride_core::{money, CommissionOutput, DriverMetrics, Tier};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A number that may arrive as a JSON number or a decimal string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumericInput {
    /// `500` or `333.335`
    Number(serde_json::Number),
    /// `"500.00"`
    Text(String),
}

impl NumericInput {
    /// Exact decimal value
    pub fn to_decimal(&self, field: &str) -> Result<Decimal, GatewayError> {
        let text = match self {
            NumericInput::Number(n) => n.to_string(),
            NumericInput::Text(s) => s.clone(),
        };
        money::parse_amount(&text)
            .or_else(|_| Decimal::from_scientific(text.trim()).map_err(|e| e.to_string()))
            .map_err(|_| {
                GatewayError::Validation(format!("{} is not a valid number: {}", field, text))
            })
    }
}

/// Driver performance supplied by the caller
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsInput {
    /// Rides completed this week
    pub weekly_rides_completed: u32,
    /// Average rating
    pub rating: NumericInput,
}

/// `POST /api/v1/commission/calculate` body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateRequest {
    /// Driver the fare belongs to
    pub driver_id: String,
    /// Fare in MZN
    #[serde(rename = "fareMZN")]
    pub fare_mzn: NumericInput,
    /// Driver performance
    pub metrics: MetricsInput,
}

impl CalculateRequest {
    /// Parse and validate a raw body
    pub fn parse(body: &str) -> Result<Self, GatewayError> {
        let request: CalculateRequest =
            serde_json::from_str(body).map_err(|e| GatewayError::Parse(e.to_string()))?;
        if request.driver_id.trim().is_empty() {
            return Err(GatewayError::Validation("driverId must not be empty".to_string()));
        }
        Ok(request)
    }

    /// Fare as an exact decimal
    pub fn fare(&self) -> Result<Decimal, GatewayError> {
        self.fare_mzn.to_decimal("fareMZN")
    }

    /// Metrics in the core's shape
    pub fn driver_metrics(&self) -> Result<DriverMetrics, GatewayError> {
        Ok(DriverMetrics {
            weekly_rides_completed: self.metrics.weekly_rides_completed,
            rating: self.metrics.rating.to_decimal("metrics.rating")?,
            tier: Tier::Bronze,
        })
    }
}

/// Commission split as returned to callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionData {
    /// Fare rounded to centavos
    #[serde(rename = "finalFareMZN")]
    pub final_fare_mzn: String,
    /// Platform commission
    #[serde(rename = "commissionMZN")]
    pub commission_mzn: String,
    /// Driver payout
    #[serde(rename = "driverPayoutMZN")]
    pub driver_payout_mzn: String,
    /// Rate in percent
    pub commission_rate: f64,
    /// Tier applied
    pub applied_tier: Tier,
    /// Why the tier applied
    pub reason: String,
    /// Driver may cash out immediately
    pub instant_payout_eligible: bool,
}

impl From<CommissionOutput> for CommissionData {
    fn from(out: CommissionOutput) -> Self {
        Self {
            final_fare_mzn: money::to_fixed2(out.fare),
            commission_mzn: money::to_fixed2(out.commission),
            driver_payout_mzn: money::to_fixed2(out.payout),
            commission_rate: out.rate_percent.to_f64().unwrap_or_default(),
            applied_tier: out.tier,
            reason: out.reason,
            instant_payout_eligible: out.instant_payout_eligible,
        }
    }
}

/// Success envelope
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    /// Always true
    pub success: bool,
    /// Payload
    pub data: T,
    /// Server time
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    /// Wrap a payload
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// `GET /health` body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy"
    pub status: &'static str,
    /// Service name
    pub service: &'static str,
    /// Crate version
    pub version: &'static str,
}
