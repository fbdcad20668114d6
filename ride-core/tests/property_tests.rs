//! Property-based tests for ride core invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Money conservation: commission + payout == round2(fare)
//! - Tier monotonicity: more rides or a better rating never lowers the tier
//! - Hash determinism: same inputs → same hash, any change → new hash
//! - Balance conservation: audit totals agree with incremental tracking
//! - Idempotent rejection: a guarded-out event leaves the snapshot byte-identical

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use ride_core::{
    commission,
    crypto::{hash_entry, EntryHash},
    money::round2,
    types::{Address, CommissionOutput, RideSettlement},
    AccountId, Direction, DriverMetrics, LedgerService, ManualClock, ReasonCode, RideCompletion,
    RideConfig, RideEvent, RideId, RideMachine, RideRequest, RideState, Tier,
};
use rust_decimal::Decimal;
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 20, 6, 0, 0).unwrap()
}

/// Fares with up to 3 decimals, so rounding is exercised
fn fare_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..100_000_000i64).prop_map(|mills| Decimal::new(mills, 3))
}

/// Ratings 1.0 - 5.0 in 0.01 steps
fn rating_strategy() -> impl Strategy<Value = Decimal> {
    (100i64..=500i64).prop_map(|hundredths| Decimal::new(hundredths, 2))
}

fn metrics(weekly_rides_completed: u32, rating: Decimal) -> DriverMetrics {
    DriverMetrics {
        weekly_rides_completed,
        rating,
        tier: Tier::Bronze,
    }
}

/// Strategy for generating posting amounts (positive cents)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Credit), Just(Direction::Debit)]
}

fn request() -> RideRequest {
    RideRequest {
        ride_id: RideId::new("ride-prop"),
        rider_id: "rider-prop".to_string(),
        rider_name: "Rider".to_string(),
        rider_rating: Decimal::new(47, 1),
        pickup: Address::new("Pickup"),
        dropoff: Address::new("Dropoff"),
        estimated_fare: Decimal::from(300),
        estimated_duration_mins: 12,
        estimated_distance_km: Decimal::from(5),
    }
}

fn completion() -> RideCompletion {
    RideCompletion {
        actual_fare: Decimal::from(300),
        actual_distance_km: None,
        rating: Some(4),
        feedback: None,
        settlement: RideSettlement {
            ride_id: RideId::new("ride-prop"),
            commission: CommissionOutput {
                fare: Decimal::new(30000, 2),
                commission: Decimal::new(5100, 2),
                payout: Decimal::new(24900, 2),
                tier: Tier::Bronze,
                rate_percent: Decimal::from(17),
                reason: "BRONZE".to_string(),
                instant_payout_eligible: false,
            },
            driver_entry: EntryHash::from_bytes([7; 32]),
            platform_entry: EntryHash::from_bytes([8; 32]),
        },
    }
}

/// Strategy for generating lifecycle events
fn event_strategy() -> impl Strategy<Value = RideEvent> {
    prop_oneof![
        Just(RideEvent::GoOnline),
        Just(RideEvent::GoOffline),
        Just(RideEvent::ReceiveOffer(request())),
        Just(RideEvent::AcceptOffer),
        Just(RideEvent::RejectOffer),
        Just(RideEvent::ArrivedAtPickup),
        Just(RideEvent::RiderOnBoard),
        Just(RideEvent::ArrivedAtDestination),
        Just(RideEvent::CompleteRide(completion())),
        Just(RideEvent::CancelRideNoShow),
        Just(RideEvent::StartWaitingTimer),
        Just(RideEvent::IncrementWaitingTimer),
        Just(RideEvent::ApplyWaitingFee(Decimal::from(50))),
        Just(RideEvent::DecrementOfferCountdown),
        Just(RideEvent::Tick),
        Just(RideEvent::Tick),
        Just(RideEvent::Tick),
        Just(RideEvent::TriggerEmergency(ride_core::types::GeoPoint {
            latitude: -25.96,
            longitude: 32.58,
        })),
        Just(RideEvent::ClearEmergency),
    ]
}

/// Short timers so random walks reach every state
fn fast_config() -> RideConfig {
    RideConfig {
        offer_countdown_secs: 3,
        waiting_fee_threshold_secs: 2,
        waiting_fee: Decimal::from(50),
    }
}

/// Target state of a transition event, or None when its guard must fail
fn expected_transition(m: &RideMachine, event: &RideEvent) -> Option<Option<RideState>> {
    use RideState::*;
    let s = m.state();
    let target = match event {
        RideEvent::GoOnline => matches!(s, Offline | TripSummary).then_some(Online),
        RideEvent::GoOffline => matches!(s, Online | TripSummary).then_some(Offline),
        RideEvent::ReceiveOffer(_) => (s == Online).then_some(OfferReceived),
        RideEvent::AcceptOffer => (s == OfferReceived).then_some(NavigatingToPickup),
        RideEvent::RejectOffer => (s == OfferReceived).then_some(Online),
        RideEvent::ArrivedAtPickup => (s == NavigatingToPickup).then_some(ArrivedAtPickup),
        RideEvent::RiderOnBoard => (s == ArrivedAtPickup).then_some(RideInProgress),
        RideEvent::CancelRideNoShow => m.no_show_available().then_some(Online),
        RideEvent::ArrivedAtDestination => (s == RideInProgress).then_some(ArrivedAtDestination),
        RideEvent::CompleteRide(_) => m.can_complete().then_some(TripSummary),
        // Timers, fees and the emergency flag are not state transitions
        _ => return None,
    };
    Some(target)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_commission_sums_to_rounded_fare(
        fare in fare_strategy(),
        rides in 0u32..250,
        rating in rating_strategy(),
    ) {
        let out = commission::compute(fare, &metrics(rides, rating)).unwrap();
        prop_assert_eq!(out.commission + out.payout, round2(fare));
        prop_assert_eq!(out.fare, round2(fare));
        prop_assert!(out.commission >= Decimal::ZERO);
        prop_assert!(out.payout >= Decimal::ZERO);
        prop_assert!(out.commission.scale() <= 2);
        prop_assert_eq!(out.rate_percent, out.tier.rate_percent());
        prop_assert_eq!(out.instant_payout_eligible, out.tier == Tier::Gold);
    }

    #[test]
    fn prop_tier_monotonic_in_rides(
        a in 0u32..250,
        b in 0u32..250,
        rating in rating_strategy(),
    ) {
        let (lo, hi) = (a.min(b), a.max(b));
        let (t_lo, _) = commission::select_tier(&metrics(lo, rating));
        let (t_hi, _) = commission::select_tier(&metrics(hi, rating));
        prop_assert!(t_lo <= t_hi);
    }

    #[test]
    fn prop_tier_monotonic_in_rating(
        rides in 0u32..250,
        a in rating_strategy(),
        b in rating_strategy(),
    ) {
        let (lo, hi) = (a.min(b), a.max(b));
        let (t_lo, _) = commission::select_tier(&metrics(rides, lo));
        let (t_hi, _) = commission::select_tier(&metrics(rides, hi));
        prop_assert!(t_lo <= t_hi);
    }

    #[test]
    fn prop_invalid_inputs_rejected(
        cents in 1i64..1_000_000,
        rating in prop_oneof![0i64..100, 501i64..1000],
    ) {
        let negative = Decimal::new(-cents, 2);
        prop_assert!(commission::compute(negative, &DriverMetrics::default()).is_err());

        let bad = metrics(10, Decimal::new(rating, 2));
        prop_assert!(commission::compute(Decimal::from(100), &bad).is_err());
    }

    #[test]
    fn prop_hash_deterministic(
        subject in "[a-z]{1,8}-[0-9]{1,4}",
        amount in amount_strategy(),
        direction in direction_strategy(),
        offset_ms in 0i64..1_000_000_000,
    ) {
        let subject = AccountId::new(subject);
        let at = t0() + Duration::milliseconds(offset_ms);
        prop_assert_eq!(
            hash_entry(&subject, amount, direction, at),
            hash_entry(&subject, amount, direction, at)
        );
    }

    #[test]
    fn prop_hash_sensitive_to_each_input(
        subject in "[a-z]{1,8}-[0-9]{1,4}",
        amount in amount_strategy(),
        direction in direction_strategy(),
        offset_ms in 0i64..1_000_000_000,
    ) {
        let id = AccountId::new(subject.clone());
        let at = t0() + Duration::milliseconds(offset_ms);
        let base = hash_entry(&id, amount, direction, at);

        let other_subject = AccountId::new(format!("{}x", subject));
        prop_assert_ne!(base, hash_entry(&other_subject, amount, direction, at));
        prop_assert_ne!(base, hash_entry(&id, amount + Decimal::new(1, 2), direction, at));
        prop_assert_ne!(base, hash_entry(&id, amount, direction.opposite(), at));
        prop_assert_ne!(base, hash_entry(&id, amount, direction, at + Duration::nanoseconds(1)));
    }

    #[test]
    fn prop_balance_conservation(
        opening_cents in 0i64..10_000_000,
        ops in prop::collection::vec((direction_strategy(), amount_strategy()), 1..40),
    ) {
        let clock = Arc::new(ManualClock::new(t0()));
        let ledger = LedgerService::new(AccountId::new("PLATFORM"), clock.clone());
        let driver = AccountId::new("driver-prop");

        let opening = Decimal::new(opening_cents, 2);
        let mut balance = opening;
        let mut entries = Vec::new();

        for (direction, amount) in ops {
            let reason = match direction {
                Direction::Credit => ReasonCode::RidePayout,
                Direction::Debit => ReasonCode::Withdrawal,
            };
            match ledger.create_entry(&driver, direction, reason, amount, balance) {
                Ok(entry) => {
                    balance = entry.balance_after();
                    entries.push(entry);
                }
                Err(e) => {
                    // Only an overdraft may be refused
                    prop_assert!(direction == Direction::Debit && amount > balance);
                    prop_assert!(e.is_recoverable());
                }
            }
            prop_assert!(balance >= Decimal::ZERO);
            clock.advance(Duration::milliseconds(1));
        }

        let report = LedgerService::audit(&entries);
        prop_assert!(report.is_valid);
        if let Some(summary) = report.subject(&driver) {
            prop_assert_eq!(summary.opening_balance, opening);
            let credits: Decimal = entries
                .iter()
                .filter(|e| e.direction() == Direction::Credit)
                .map(|e| e.amount())
                .sum();
            let debits: Decimal = entries
                .iter()
                .filter(|e| e.direction() == Direction::Debit)
                .map(|e| e.amount())
                .sum();
            prop_assert_eq!(summary.net_balance, opening + credits - debits);
            prop_assert_eq!(summary.net_balance, balance);
            prop_assert_eq!(summary.closing_balance, balance);
            prop_assert_eq!(summary.entry_count, entries.len());
        } else {
            prop_assert!(entries.is_empty());
        }
    }

    #[test]
    fn prop_rejected_events_change_nothing(
        walk in prop::collection::vec(event_strategy(), 0..60),
        last in event_strategy(),
    ) {
        let mut m = RideMachine::new(AccountId::new("driver-prop"), fast_config());
        let mut now = t0();
        for event in walk {
            m = m.apply(event, now);
            now += Duration::seconds(1);
        }

        if let Some(target) = expected_transition(&m, &last) {
            let before = serde_json::to_vec(&m).unwrap();
            let history = m.history().len();
            let next = m.apply(last, now);
            match target {
                None => {
                    prop_assert_eq!(serde_json::to_vec(&next).unwrap(), before);
                }
                Some(state) => {
                    prop_assert_eq!(next.state(), state);
                    prop_assert_eq!(next.history().len(), history + 1);
                    prop_assert_eq!(next.session().is_some(), state.has_session());
                }
            }
        }
    }

    #[test]
    fn prop_session_matches_state(walk in prop::collection::vec(event_strategy(), 0..80)) {
        let mut m = RideMachine::new(AccountId::new("driver-prop"), fast_config());
        let mut now = t0();
        for event in walk {
            m = m.apply(event, now);
            now += Duration::seconds(1);

            prop_assert_eq!(m.session().is_some(), m.state().has_session());
            prop_assert_eq!(m.history().last().copied(), Some(m.state()));
            if m.state() != RideState::OfferReceived {
                prop_assert_eq!(m.offer_seconds_left(), 0);
            }
            if m.state() != RideState::ArrivedAtPickup {
                prop_assert!(!m.waiting_timer().is_running());
            }
            if let Some(session) = m.session() {
                prop_assert!(session.waiting_fee <= Decimal::from(50));
            }
        }
    }
}

#[test]
fn test_tier_ladder_by_weekly_rides() {
    let rating = Decimal::new(45, 1);
    let tiers: Vec<Tier> = [49, 50, 99, 100]
        .iter()
        .map(|&rides| commission::select_tier(&metrics(rides, rating)).0)
        .collect();
    assert_eq!(tiers, vec![Tier::Bronze, Tier::Silver, Tier::Silver, Tier::Gold]);
}
