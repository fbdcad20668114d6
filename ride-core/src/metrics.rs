//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for the ride core.
//!
//! # Metrics
//!
//! - `ride_transitions_total` - State transitions applied
//! - `ride_transitions_ignored_total` - Events dropped by a guard
//! - `rides_completed_total` - Rides settled
//! - `ledger_entries_total` - Ledger entries committed
//! - `ledger_fare_mismatch_total` - Settlements rejected for fare ≠ commission + payout
//! - `commission_calculations_total` - Commission Engine invocations
//! - `settlement_duration_seconds` - Histogram of completeRide settlement latency

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
///
/// Each collector owns its registry, so any number can coexist in one process.
#[derive(Debug, Clone)]
pub struct Metrics {
    /// State transitions applied
    pub transitions_total: IntCounter,

    /// Events ignored by a guard
    pub transitions_ignored_total: IntCounter,

    /// Rides settled
    pub rides_completed_total: IntCounter,

    /// Ledger entries committed
    pub ledger_entries_total: IntCounter,

    /// Fare mismatches detected
    pub fare_mismatch_total: IntCounter,

    /// Commission calculations
    pub commission_calculations_total: IntCounter,

    /// Settlement duration histogram
    pub settlement_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        let transitions_total =
            counter("ride_transitions_total", "Total number of state transitions applied")?;
        let transitions_ignored_total = counter(
            "ride_transitions_ignored_total",
            "Total number of events ignored by a guard",
        )?;
        let rides_completed_total =
            counter("rides_completed_total", "Total number of rides settled")?;
        let ledger_entries_total =
            counter("ledger_entries_total", "Total number of ledger entries committed")?;
        let fare_mismatch_total = counter(
            "ledger_fare_mismatch_total",
            "Settlements rejected because fare != commission + payout",
        )?;
        let commission_calculations_total = counter(
            "commission_calculations_total",
            "Total number of commission calculations",
        )?;

        let settlement_duration = Histogram::with_opts(
            HistogramOpts::new(
                "settlement_duration_seconds",
                "Histogram of ride settlement latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(settlement_duration.clone()))?;

        Ok(Self {
            transitions_total,
            transitions_ignored_total,
            rides_completed_total,
            ledger_entries_total,
            fare_mismatch_total,
            commission_calculations_total,
            settlement_duration,
            registry,
        })
    }

    /// Record the outcome of one event
    pub fn record_event(&self, applied: bool) {
        if applied {
            self.transitions_total.inc();
        } else {
            self.transitions_ignored_total.inc();
        }
    }

    /// Record a settled ride and its two entries
    pub fn record_ride_settled(&self, duration_seconds: f64) {
        self.rides_completed_total.inc();
        self.ledger_entries_total.inc_by(2);
        self.settlement_duration.observe(duration_seconds);
    }

    /// Record a fare mismatch
    pub fn record_fare_mismatch(&self) {
        self.fare_mismatch_total.inc();
    }

    /// Record a commission calculation
    pub fn record_commission(&self) {
        self.commission_calculations_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
