//! Ride lifecycle machine
//!
//! One driver's lifecycle as a plain value: every transition consumes the
//! machine and returns the next one. An event whose guard fails returns the
//! machine untouched, so a double-submitted command can never corrupt state.
//!
//! ```text
//! OFFLINE ──goOnline──▶ ONLINE ──receiveOffer──▶ OFFER_RECEIVED
//!    ▲                    ▲  ▲                     │        │
//!    │                    │  └──reject / timeout───┘        │ accept
//!    │                    │                                 ▼
//!    │                    │                     NAVIGATING_TO_PICKUP
//!    │                    │                                 │ arrivedAtPickup
//!    │                    │                                 ▼
//!    │                    └────────cancelRideNoShow── ARRIVED_AT_PICKUP
//!    │                                                      │ riderOnBoard
//!    │                                                      ▼
//!    │                                              RIDE_IN_PROGRESS
//!    │                                                      │ arrivedAtDestination
//!    │                                                      ▼
//!    │                                           ARRIVED_AT_DESTINATION
//!    │                                                      │ completeRide
//!    │                                                      ▼
//!    └──────────────goOffline─────────────────────── TRIP_SUMMARY ──goOnline──▶ ONLINE
//! ```
//!
//! The machine owns no timers. An external scheduler calls [`RideMachine::tick`]
//! once per second; the tick drives the offer countdown in `OFFER_RECEIVED`
//! and the waiting timer in `ARRIVED_AT_PICKUP`.

use crate::config::RideConfig;
use crate::money::ensure_postable;
use crate::types::{
    AccountId, EmergencyFlag, GeoPoint, RideRequest, RideSession, RideSettlement, RideState,
    WaitingTimer,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Data supplied when a ride is completed
///
/// `settlement` is produced by the commission engine and ledger service
/// before the transition is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideCompletion {
    /// Fare charged
    pub actual_fare: Decimal,
    /// Measured distance; falls back to the estimate
    pub actual_distance_km: Option<Decimal>,
    /// Driver's rating of the rider (1-5)
    pub rating: Option<u8>,
    /// Driver's feedback
    pub feedback: Option<String>,
    /// Commission split and ledger entry hashes
    pub settlement: RideSettlement,
}

/// Commands accepted by the machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideEvent {
    /// Start accepting offers
    GoOnline,
    /// Stop accepting offers
    GoOffline,
    /// Dispatch pushed an offer
    ReceiveOffer(RideRequest),
    /// Driver accepted the offer
    AcceptOffer,
    /// Driver declined the offer
    RejectOffer,
    /// Driver reached the pickup
    ArrivedAtPickup,
    /// Rider boarded
    RiderOnBoard,
    /// Driver reached the dropoff
    ArrivedAtDestination,
    /// Ride settled
    CompleteRide(RideCompletion),
    /// Rider never showed up
    CancelRideNoShow,
    /// Start the pickup waiting timer
    StartWaitingTimer,
    /// One second of waiting
    IncrementWaitingTimer,
    /// Add a waiting fee to the fare
    ApplyWaitingFee(Decimal),
    /// One second of offer countdown
    DecrementOfferCountdown,
    /// One scheduler second
    Tick,
    /// Raise the emergency flag
    TriggerEmergency(GeoPoint),
    /// Lower the emergency flag
    ClearEmergency,
}

impl RideEvent {
    /// Log label
    pub fn name(&self) -> &'static str {
        match self {
            RideEvent::GoOnline => "goOnline",
            RideEvent::GoOffline => "goOffline",
            RideEvent::ReceiveOffer(_) => "receiveOffer",
            RideEvent::AcceptOffer => "acceptOffer",
            RideEvent::RejectOffer => "rejectOffer",
            RideEvent::ArrivedAtPickup => "arrivedAtPickup",
            RideEvent::RiderOnBoard => "riderOnBoard",
            RideEvent::ArrivedAtDestination => "arrivedAtDestination",
            RideEvent::CompleteRide(_) => "completeRide",
            RideEvent::CancelRideNoShow => "cancelRideNoShow",
            RideEvent::StartWaitingTimer => "startWaitingTimer",
            RideEvent::IncrementWaitingTimer => "incrementWaitingTimer",
            RideEvent::ApplyWaitingFee(_) => "applyWaitingFee",
            RideEvent::DecrementOfferCountdown => "decrementOfferCountdown",
            RideEvent::Tick => "tick",
            RideEvent::TriggerEmergency(_) => "triggerEmergency",
            RideEvent::ClearEmergency => "clearEmergency",
        }
    }
}

/// Rolling per-driver stats
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverStats {
    /// Σ driver payouts
    pub earnings: Decimal,
    /// Rides completed
    pub rides_completed: u32,
    /// Most recent settlement, for the trip summary
    pub last_settlement: Option<RideSettlement>,
}

/// Snapshot of one driver's lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideMachine {
    driver_id: AccountId,
    config: RideConfig,
    state: RideState,
    session: Option<RideSession>,
    offer_countdown: u32,
    waiting_timer: WaitingTimer,
    emergency: EmergencyFlag,
    stats: DriverStats,
    history: Vec<RideState>,
}

impl RideMachine {
    /// Fresh machine, OFFLINE
    pub fn new(driver_id: AccountId, config: RideConfig) -> Self {
        Self {
            driver_id,
            config,
            state: RideState::Offline,
            session: None,
            offer_countdown: 0,
            waiting_timer: WaitingTimer::default(),
            emergency: EmergencyFlag::default(),
            stats: DriverStats::default(),
            history: vec![RideState::Offline],
        }
    }

    // Queries

    /// Driver this machine belongs to
    pub fn driver_id(&self) -> &AccountId {
        &self.driver_id
    }

    /// Rules in force
    pub fn config(&self) -> &RideConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> RideState {
        self.state
    }

    /// Ride in flight
    pub fn session(&self) -> Option<&RideSession> {
        self.session.as_ref()
    }

    /// Seconds left to accept the offer (0 outside OFFER_RECEIVED)
    pub fn offer_seconds_left(&self) -> u32 {
        self.offer_countdown
    }

    /// Pickup waiting timer
    pub fn waiting_timer(&self) -> &WaitingTimer {
        &self.waiting_timer
    }

    /// Emergency side channel
    pub fn emergency(&self) -> &EmergencyFlag {
        &self.emergency
    }

    /// Rolling stats
    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    /// Every state ever entered, oldest first
    pub fn history(&self) -> &[RideState] {
        &self.history
    }

    /// No ride in flight
    pub fn is_idle(&self) -> bool {
        self.session.is_none()
    }

    /// `completeRide` would be accepted
    pub fn can_complete(&self) -> bool {
        self.state == RideState::ArrivedAtDestination && self.session.is_some()
    }

    /// Waited long enough to cancel as a no-show
    pub fn no_show_available(&self) -> bool {
        self.state == RideState::ArrivedAtPickup
            && self.session.is_some()
            && self.waiting_timer.elapsed_secs >= self.config.waiting_fee_threshold_secs
    }

    // Dispatch

    /// Apply any event
    pub fn apply(self, event: RideEvent, now: DateTime<Utc>) -> Self {
        match event {
            RideEvent::GoOnline => self.go_online(),
            RideEvent::GoOffline => self.go_offline(),
            RideEvent::ReceiveOffer(request) => self.receive_offer(request, now),
            RideEvent::AcceptOffer => self.accept_offer(),
            RideEvent::RejectOffer => self.reject_offer(),
            RideEvent::ArrivedAtPickup => self.arrived_at_pickup(now),
            RideEvent::RiderOnBoard => self.rider_on_board(now),
            RideEvent::ArrivedAtDestination => self.arrived_at_destination(),
            RideEvent::CompleteRide(completion) => self.complete_ride(completion, now),
            RideEvent::CancelRideNoShow => self.cancel_ride_no_show(),
            RideEvent::StartWaitingTimer => self.start_waiting_timer(now),
            RideEvent::IncrementWaitingTimer => self.increment_waiting_timer(),
            RideEvent::ApplyWaitingFee(fee) => self.apply_waiting_fee(fee),
            RideEvent::DecrementOfferCountdown => self.decrement_offer_countdown(),
            RideEvent::Tick => self.tick(),
            RideEvent::TriggerEmergency(location) => self.trigger_emergency(location, now),
            RideEvent::ClearEmergency => self.clear_emergency(),
        }
    }

    // Transitions

    /// OFFLINE | TRIP_SUMMARY → ONLINE
    pub fn go_online(self) -> Self {
        if !matches!(self.state, RideState::Offline | RideState::TripSummary) {
            return self.ignored("goOnline");
        }
        let mut next = self.enter(RideState::Online);
        next.session = None;
        next
    }

    /// ONLINE | TRIP_SUMMARY → OFFLINE
    pub fn go_offline(self) -> Self {
        if !matches!(self.state, RideState::Online | RideState::TripSummary) {
            return self.ignored("goOffline");
        }
        let mut next = self.enter(RideState::Offline);
        next.session = None;
        next.offer_countdown = 0;
        next.waiting_timer = WaitingTimer::default();
        next
    }

    /// ONLINE → OFFER_RECEIVED, countdown starts
    pub fn receive_offer(self, request: RideRequest, now: DateTime<Utc>) -> Self {
        if self.state != RideState::Online {
            return self.ignored("receiveOffer");
        }
        let countdown = self.config.offer_countdown_secs;
        let mut next = self.enter(RideState::OfferReceived);
        next.session = Some(RideSession::from_request(request, now));
        next.offer_countdown = countdown;
        next.waiting_timer = WaitingTimer::default();
        next
    }

    /// OFFER_RECEIVED → NAVIGATING_TO_PICKUP
    pub fn accept_offer(self) -> Self {
        if self.state != RideState::OfferReceived || self.session.is_none() {
            return self.ignored("acceptOffer");
        }
        let mut next = self.enter(RideState::NavigatingToPickup);
        next.offer_countdown = 0;
        next
    }

    /// OFFER_RECEIVED → ONLINE, offer dropped
    pub fn reject_offer(self) -> Self {
        if self.state != RideState::OfferReceived {
            return self.ignored("rejectOffer");
        }
        let mut next = self.enter(RideState::Online);
        next.session = None;
        next.offer_countdown = 0;
        next
    }

    /// One second off the offer countdown; zero rejects the offer
    pub fn decrement_offer_countdown(mut self) -> Self {
        if self.state != RideState::OfferReceived {
            return self.ignored("decrementOfferCountdown");
        }
        self.offer_countdown = self.offer_countdown.saturating_sub(1);
        if self.offer_countdown == 0 {
            tracing::debug!(driver_id = %self.driver_id, "Offer countdown expired");
            return self.reject_offer();
        }
        self
    }

    /// NAVIGATING_TO_PICKUP → ARRIVED_AT_PICKUP, waiting timer starts
    pub fn arrived_at_pickup(self, now: DateTime<Utc>) -> Self {
        if self.state != RideState::NavigatingToPickup || self.session.is_none() {
            return self.ignored("arrivedAtPickup");
        }
        let mut next = self.enter(RideState::ArrivedAtPickup);
        next.waiting_timer = WaitingTimer {
            started_at: Some(now),
            ..WaitingTimer::default()
        };
        next
    }

    /// Start the waiting timer if it is not already running
    pub fn start_waiting_timer(mut self, now: DateTime<Utc>) -> Self {
        if self.state != RideState::ArrivedAtPickup
            || self.session.is_none()
            || self.waiting_timer.is_running()
        {
            return self.ignored("startWaitingTimer");
        }
        self.waiting_timer.started_at = Some(now);
        self
    }

    /// One second of waiting; applies the waiting fee once at the threshold
    pub fn increment_waiting_timer(mut self) -> Self {
        if self.state != RideState::ArrivedAtPickup || !self.waiting_timer.is_running() {
            return self.ignored("incrementWaitingTimer");
        }
        self.waiting_timer.elapsed_secs = self.waiting_timer.elapsed_secs.saturating_add(1);

        if self.waiting_timer.elapsed_secs >= self.config.waiting_fee_threshold_secs
            && !self.waiting_timer.fee_applied
        {
            let fee = self.config.waiting_fee;
            return self.apply_waiting_fee(fee);
        }
        self
    }

    /// Add `fee` to the session fare, at most once per pickup
    pub fn apply_waiting_fee(mut self, fee: Decimal) -> Self {
        if self.waiting_timer.fee_applied
            || self.waiting_timer.elapsed_secs < self.config.waiting_fee_threshold_secs
            || self.state != RideState::ArrivedAtPickup
        {
            return self.ignored("applyWaitingFee");
        }
        if let Err(e) = ensure_postable(fee) {
            tracing::warn!(driver_id = %self.driver_id, error = %e, "Waiting fee rejected");
            return self;
        }
        let Some(session) = self.session.as_mut() else {
            return self.ignored("applyWaitingFee");
        };

        session.waiting_fee += fee;
        session.estimated_fare += fee;
        self.waiting_timer.fee_applied = true;

        tracing::info!(
            driver_id = %self.driver_id,
            ride_id = %session.ride_id,
            fee = %fee,
            elapsed_secs = self.waiting_timer.elapsed_secs,
            "Waiting fee applied"
        );
        self
    }

    /// ARRIVED_AT_PICKUP → RIDE_IN_PROGRESS
    pub fn rider_on_board(self, now: DateTime<Utc>) -> Self {
        if self.state != RideState::ArrivedAtPickup || self.session.is_none() {
            return self.ignored("riderOnBoard");
        }
        let mut next = self.enter(RideState::RideInProgress);
        if let Some(session) = next.session.as_mut() {
            session.started_at = Some(now);
        }
        next.waiting_timer = WaitingTimer::default();
        next
    }

    /// ARRIVED_AT_PICKUP → ONLINE after the waiting threshold
    pub fn cancel_ride_no_show(self) -> Self {
        if !self.no_show_available() {
            return self.ignored("cancelRideNoShow");
        }
        let ride_id = self.session.as_ref().map(|s| s.ride_id.to_string());
        let mut next = self.enter(RideState::Online);
        next.session = None;
        next.waiting_timer = WaitingTimer {
            no_show_cancelled: true,
            ..WaitingTimer::default()
        };
        tracing::info!(driver_id = %next.driver_id, ride_id = ?ride_id, "Ride cancelled: no-show");
        next
    }

    /// RIDE_IN_PROGRESS → ARRIVED_AT_DESTINATION
    pub fn arrived_at_destination(self) -> Self {
        if self.state != RideState::RideInProgress {
            return self.ignored("arrivedAtDestination");
        }
        self.enter(RideState::ArrivedAtDestination)
    }

    /// ARRIVED_AT_DESTINATION → TRIP_SUMMARY with the settled actuals
    pub fn complete_ride(self, completion: RideCompletion, now: DateTime<Utc>) -> Self {
        let matches_session = self
            .session
            .as_ref()
            .is_some_and(|s| s.ride_id == completion.settlement.ride_id);
        if !self.can_complete() || !matches_session {
            return self.ignored("completeRide");
        }

        let mut next = self.enter(RideState::TripSummary);
        if let Some(session) = next.session.as_mut() {
            session.actual_fare = Some(completion.actual_fare);
            session.actual_distance_km = Some(
                completion
                    .actual_distance_km
                    .unwrap_or(session.estimated_distance_km),
            );
            session.actual_duration_mins = session
                .started_at
                .map(|started| (now - started).num_minutes().max(0) as u32);
            session.completed_at = Some(now);
            session.rating = completion.rating;
            session.feedback = completion.feedback;
        }

        next.stats.earnings += completion.settlement.commission.payout;
        next.stats.rides_completed += 1;
        next.stats.last_settlement = Some(completion.settlement);
        next
    }

    /// Scheduler second: countdown in OFFER_RECEIVED, waiting in ARRIVED_AT_PICKUP
    pub fn tick(self) -> Self {
        match self.state {
            RideState::OfferReceived => self.decrement_offer_countdown(),
            RideState::ArrivedAtPickup => self.increment_waiting_timer(),
            _ => self,
        }
    }

    // Emergency

    /// Raise the emergency flag while driving
    pub fn trigger_emergency(mut self, location: GeoPoint, now: DateTime<Utc>) -> Self {
        if !matches!(
            self.state,
            RideState::NavigatingToPickup | RideState::RideInProgress
        ) {
            return self.ignored("triggerEmergency");
        }
        self.emergency = EmergencyFlag {
            active: true,
            location: Some(location),
            raised_at: Some(now),
        };
        tracing::warn!(
            driver_id = %self.driver_id,
            state = %self.state,
            latitude = location.latitude,
            longitude = location.longitude,
            "Emergency raised"
        );
        self
    }

    /// Lower the emergency flag
    pub fn clear_emergency(mut self) -> Self {
        if !self.emergency.active {
            return self.ignored("clearEmergency");
        }
        self.emergency = EmergencyFlag::default();
        self
    }

    // Helpers

    fn enter(mut self, to: RideState) -> Self {
        tracing::debug!(
            driver_id = %self.driver_id,
            from = %self.state,
            to = %to,
            "Ride state transition"
        );
        self.state = to;
        self.history.push(to);
        self
    }

    fn ignored(self, event: &'static str) -> Self {
        tracing::trace!(
            driver_id = %self.driver_id,
            state = %self.state,
            event,
            "Event ignored: guard failed"
        );
        self
    }
}
