//! Commission engine
//!
//! Pure function from `(fare, driver metrics)` to a commission split. Tiers
//! are evaluated top-down and the first match wins; meeting either threshold
//! of a tier is enough:
//!
//! | Tier   | Weekly rides | Rating | Rate |
//! |--------|--------------|--------|------|
//! | GOLD   | ≥ 100        | ≥ 4.9  | 12%  |
//! | SILVER | ≥ 50         | ≥ 4.8  | 15%  |
//! | BRONZE | -            | -      | 17%  |
//!
//! `commission = round2(fare × rate / 100)` and `payout = round2(fare) −
//! commission`, so the two always add back to the rounded fare.

use crate::money::{percent_of, round2, to_fixed2};
use crate::types::{CommissionOutput, DriverMetrics, Tier};
use crate::{Error, Result};
use rust_decimal::Decimal;

/// Weekly rides that qualify for GOLD
pub const GOLD_WEEKLY_RIDES: u32 = 100;
/// Weekly rides that qualify for SILVER
pub const SILVER_WEEKLY_RIDES: u32 = 50;

/// Rating that qualifies for GOLD
pub fn gold_rating() -> Decimal {
    Decimal::new(49, 1)
}

/// Rating that qualifies for SILVER
pub fn silver_rating() -> Decimal {
    Decimal::new(48, 1)
}

/// Lowest accepted rating
pub fn min_rating() -> Decimal {
    Decimal::ONE
}

/// Highest accepted rating
pub fn max_rating() -> Decimal {
    Decimal::from(5)
}

/// Which tier a driver qualifies for, and why
pub fn select_tier(metrics: &DriverMetrics) -> (Tier, String) {
    let rides = metrics.weekly_rides_completed;
    let rating = metrics.rating;

    if rides >= GOLD_WEEKLY_RIDES || rating >= gold_rating() {
        let reason = if rides >= GOLD_WEEKLY_RIDES {
            format!("GOLD: {} weekly rides (>= {})", rides, GOLD_WEEKLY_RIDES)
        } else {
            format!("GOLD: rating {} (>= {})", rating, gold_rating())
        };
        return (Tier::Gold, reason);
    }

    if rides >= SILVER_WEEKLY_RIDES || rating >= silver_rating() {
        let reason = if rides >= SILVER_WEEKLY_RIDES {
            format!("SILVER: {} weekly rides (>= {})", rides, SILVER_WEEKLY_RIDES)
        } else {
            format!("SILVER: rating {} (>= {})", rating, silver_rating())
        };
        return (Tier::Silver, reason);
    }

    (
        Tier::Bronze,
        format!("BRONZE: default tier ({} weekly rides, rating {})", rides, rating),
    )
}

/// Compute the commission split for a fare
///
/// Fails with [`Error::InvalidInput`] for a negative fare or a rating
/// outside `[1.0, 5.0]`; nothing is clamped.
pub fn compute(fare: Decimal, metrics: &DriverMetrics) -> Result<CommissionOutput> {
    if fare.is_sign_negative() && !fare.is_zero() {
        return Err(Error::InvalidInput(format!("fare must be >= 0, got {}", fare)));
    }

    if metrics.rating < min_rating() || metrics.rating > max_rating() {
        return Err(Error::InvalidInput(format!(
            "rating must be between {} and {}, got {}",
            min_rating(),
            max_rating(),
            metrics.rating
        )));
    }

    let (tier, why) = select_tier(metrics);
    let rate_percent = tier.rate_percent();

    let fare = round2(fare);
    let commission = round2(percent_of(fare, rate_percent));
    let payout = fare - commission;

    let reason = format!(
        "{}; {}% commission on {} MZN",
        why,
        rate_percent,
        to_fixed2(fare)
    );

    tracing::trace!(
        tier = %tier,
        fare = %fare,
        commission = %commission,
        payout = %payout,
        "Commission computed"
    );

    Ok(CommissionOutput {
        fare,
        commission,
        payout,
        tier,
        rate_percent,
        reason,
        instant_payout_eligible: tier.instant_payout_eligible(),
    })
}
