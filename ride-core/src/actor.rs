//! Per-driver actor
//!
//! One task owns one driver's [`RideMachine`]; every command for that driver
//! goes through its mailbox, so two transitions for the same driver can
//! never interleave. Different drivers run in parallel.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │          DriverHandle (Clone)                   │
//! │     driver app / scheduler / fleet              │
//! └──────────────────────┬─────────────────────────┘
//!                        │ mpsc::channel (bounded)
//!                        ▼
//! ┌────────────────────────────────────────────────┐
//! │          DriverActor (single task)              │
//! │  machine = machine.apply(event, now)            │
//! │                                                 │
//! │  completeRide:                                  │
//! │    metrics → commission → ride entries          │
//! │      → LedgerStore::settle_ride                 │
//! │      → transition to TRIP_SUMMARY               │
//! └────────────────────────────────────────────────┘
//! ```

use crate::{
    clock::Clock,
    commission,
    ledger::LedgerService,
    lifecycle::{RideCompletion, RideEvent, RideMachine},
    metrics::Metrics,
    storage::{AppendOutcome, LedgerStore},
    types::{AccountId, GeoPoint, RideEventRecord, RideRequest, RideSettlement},
    Error, Result,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// Collaborators shared by every driver actor
#[derive(Debug, Clone)]
pub struct DriverContext {
    /// Balances, metrics and the entry log
    pub store: Arc<dyn LedgerStore>,
    /// Entry factory
    pub ledger: LedgerService,
    /// Timestamp source
    pub clock: Arc<dyn Clock>,
    /// Prometheus counters
    pub metrics: Arc<Metrics>,
}

/// Message sent to a driver actor
#[derive(Debug)]
pub enum DriverCommand {
    /// Apply a lifecycle event (completion goes through `CompleteRide`)
    Apply {
        event: RideEvent,
        response: oneshot::Sender<RideMachine>,
    },

    /// Settle and complete the current ride
    CompleteRide {
        actual_fare: Decimal,
        rating: Option<u8>,
        feedback: Option<String>,
        response: oneshot::Sender<Result<RideMachine>>,
    },

    /// Scheduler tick, no reply
    Tick,

    /// Current snapshot
    Snapshot {
        response: oneshot::Sender<RideMachine>,
    },

    /// Stop the actor
    Shutdown,
}

/// Actor that owns one driver's machine
#[derive(Debug)]
pub struct DriverActor {
    machine: RideMachine,
    ctx: DriverContext,
    mailbox: mpsc::Receiver<DriverCommand>,
}

impl DriverActor {
    /// Create new actor
    pub fn new(
        machine: RideMachine,
        ctx: DriverContext,
        mailbox: mpsc::Receiver<DriverCommand>,
    ) -> Self {
        Self {
            machine,
            ctx,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(command) = self.mailbox.recv().await {
            match command {
                DriverCommand::Shutdown => break,
                command => self.handle_command(command),
            }
        }
        tracing::debug!(driver_id = %self.machine.driver_id(), "Driver actor stopped");
    }

    fn handle_command(&mut self, command: DriverCommand) {
        match command {
            DriverCommand::Apply { event, response } => {
                let _ = response.send(self.apply(event));
            }

            DriverCommand::CompleteRide {
                actual_fare,
                rating,
                feedback,
                response,
            } => {
                let result = self.complete_ride(actual_fare, rating, feedback);
                if let Err(e) = &result {
                    tracing::warn!(
                        driver_id = %self.machine.driver_id(),
                        error = %e,
                        code = e.code(),
                        "Ride completion failed"
                    );
                }
                let _ = response.send(result);
            }

            DriverCommand::Tick => {
                self.apply(RideEvent::Tick);
            }

            DriverCommand::Snapshot { response } => {
                let _ = response.send(self.machine.clone());
            }

            DriverCommand::Shutdown => {
                // Handled in run loop
            }
        }
    }

    /// Apply one event and publish the resulting snapshot
    fn apply(&mut self, event: RideEvent) -> RideMachine {
        if let RideEvent::CompleteRide(_) = event {
            tracing::warn!(
                driver_id = %self.machine.driver_id(),
                "Unsettled completeRide rejected; use DriverHandle::complete_ride"
            );
            self.ctx.metrics.record_event(false);
            return self.machine.clone();
        }

        let now = self.ctx.clock.now();
        let next = self.machine.clone().apply(event, now);
        self.commit(next);
        self.machine.clone()
    }

    fn complete_ride(
        &mut self,
        actual_fare: Decimal,
        rating: Option<u8>,
        feedback: Option<String>,
    ) -> Result<RideMachine> {
        let (ride_id, driver_id) = match self.machine.session() {
            Some(session) if self.machine.can_complete() => {
                (session.ride_id.clone(), self.machine.driver_id().clone())
            }
            _ => {
                self.ctx.metrics.record_event(false);
                return Ok(self.machine.clone());
            }
        };

        if let Some(r) = rating {
            if !(1..=5).contains(&r) {
                return Err(Error::InvalidInput(format!(
                    "rating {} must be between 1 and 5",
                    r
                )));
            }
        }

        let started = Instant::now();
        let store = &self.ctx.store;

        let driver_metrics = store.get_driver_metrics(&driver_id)?;
        let split = commission::compute(actual_fare, &driver_metrics)?;
        self.ctx.metrics.record_commission();

        let ledger = &self.ctx.ledger;
        let metrics = &self.ctx.metrics;
        let mut build = |driver_balance: Decimal, platform_balance: Decimal| {
            ledger
                .create_ride_entries(
                    &driver_id,
                    &ride_id,
                    split.fare,
                    split.commission,
                    split.payout,
                    driver_balance,
                    platform_balance,
                    split.rate_percent,
                )
                .map_err(|e| {
                    if e.is_integrity_violation() {
                        metrics.record_fare_mismatch();
                    }
                    e
                })
        };

        // Balances are read under the store's write lock
        let (entries, outcome) =
            store.settle_ride(&driver_id, ledger.platform_account(), &mut build)?;
        if outcome == AppendOutcome::Duplicate {
            tracing::warn!(
                driver_id = %driver_id,
                ride_id = %ride_id,
                "Ride entries already stored"
            );
        }

        // Entries are committed; the ride must complete from here on
        if let Err(e) = store.record_completed_ride(&driver_id, split.tier) {
            tracing::error!(driver_id = %driver_id, error = %e, "Failed to update driver metrics");
        }

        tracing::info!(
            driver_id = %driver_id,
            ride_id = %ride_id,
            tier = %split.tier,
            fare = %split.fare,
            commission = %split.commission,
            payout = %split.payout,
            "Ride settled"
        );

        let completion = RideCompletion {
            actual_fare: split.fare,
            actual_distance_km: None,
            rating,
            feedback,
            settlement: RideSettlement {
                ride_id,
                driver_entry: *entries.driver.hash(),
                platform_entry: *entries.platform.hash(),
                commission: split,
            },
        };

        let next = self
            .machine
            .clone()
            .complete_ride(completion, self.ctx.clock.now());
        self.commit(next);
        self.ctx
            .metrics
            .record_ride_settled(started.elapsed().as_secs_f64());

        Ok(self.machine.clone())
    }

    fn commit(&mut self, next: RideMachine) {
        let entered = next.history().len() > self.machine.history().len();
        let changed = next != self.machine;
        self.ctx.metrics.record_event(changed);
        self.machine = next;

        if entered {
            let record = RideEventRecord {
                driver_id: self.machine.driver_id().clone(),
                state: self.machine.state(),
                ride_id: self.machine.session().map(|s| s.ride_id.clone()),
                at: self.ctx.clock.now(),
            };
            // Audit trail is fire-and-forget
            if let Err(e) = self.ctx.store.append_ride_event(&record) {
                tracing::warn!(
                    driver_id = %record.driver_id,
                    state = %record.state,
                    error = %e,
                    "Failed to append ride event"
                );
            }
        }
    }
}

/// Handle for sending commands to a driver actor
#[derive(Debug, Clone)]
pub struct DriverHandle {
    driver_id: AccountId,
    sender: mpsc::Sender<DriverCommand>,
}

impl DriverHandle {
    /// Create new handle
    pub fn new(driver_id: AccountId, sender: mpsc::Sender<DriverCommand>) -> Self {
        Self { driver_id, sender }
    }

    /// Driver behind this handle
    pub fn driver_id(&self) -> &AccountId {
        &self.driver_id
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> DriverCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Apply any event except completion
    pub async fn apply(&self, event: RideEvent) -> Result<RideMachine> {
        self.request(|response| DriverCommand::Apply { event, response })
            .await
    }

    /// Current snapshot
    pub async fn snapshot(&self) -> Result<RideMachine> {
        self.request(|response| DriverCommand::Snapshot { response })
            .await
    }

    /// Start accepting offers
    pub async fn go_online(&self) -> Result<RideMachine> {
        self.apply(RideEvent::GoOnline).await
    }

    /// Stop accepting offers
    pub async fn go_offline(&self) -> Result<RideMachine> {
        self.apply(RideEvent::GoOffline).await
    }

    /// Push an offer
    pub async fn receive_offer(&self, request: RideRequest) -> Result<RideMachine> {
        self.apply(RideEvent::ReceiveOffer(request)).await
    }

    /// Accept the offer on screen
    pub async fn accept_offer(&self) -> Result<RideMachine> {
        self.apply(RideEvent::AcceptOffer).await
    }

    /// Decline the offer on screen
    pub async fn reject_offer(&self) -> Result<RideMachine> {
        self.apply(RideEvent::RejectOffer).await
    }

    /// Reached the pickup
    pub async fn arrived_at_pickup(&self) -> Result<RideMachine> {
        self.apply(RideEvent::ArrivedAtPickup).await
    }

    /// Rider boarded
    pub async fn rider_on_board(&self) -> Result<RideMachine> {
        self.apply(RideEvent::RiderOnBoard).await
    }

    /// Reached the dropoff
    pub async fn arrived_at_destination(&self) -> Result<RideMachine> {
        self.apply(RideEvent::ArrivedAtDestination).await
    }

    /// Settle the ride and move to the trip summary
    ///
    /// Returns the unchanged snapshot when no ride can be completed, and an
    /// error (machine unchanged) when settlement fails.
    pub async fn complete_ride(
        &self,
        actual_fare: Decimal,
        rating: Option<u8>,
        feedback: Option<String>,
    ) -> Result<RideMachine> {
        self.request(|response| DriverCommand::CompleteRide {
            actual_fare,
            rating,
            feedback,
            response,
        })
        .await?
    }

    /// Cancel after the rider failed to show
    pub async fn cancel_ride_no_show(&self) -> Result<RideMachine> {
        self.apply(RideEvent::CancelRideNoShow).await
    }

    /// Start the pickup waiting timer
    pub async fn start_waiting_timer(&self) -> Result<RideMachine> {
        self.apply(RideEvent::StartWaitingTimer).await
    }

    /// One second of waiting
    pub async fn increment_waiting_timer(&self) -> Result<RideMachine> {
        self.apply(RideEvent::IncrementWaitingTimer).await
    }

    /// Apply a waiting fee
    pub async fn apply_waiting_fee(&self, fee: Decimal) -> Result<RideMachine> {
        self.apply(RideEvent::ApplyWaitingFee(fee)).await
    }

    /// One second of offer countdown
    pub async fn decrement_offer_countdown(&self) -> Result<RideMachine> {
        self.apply(RideEvent::DecrementOfferCountdown).await
    }

    /// One scheduler second, awaiting the snapshot
    pub async fn tick(&self) -> Result<RideMachine> {
        self.apply(RideEvent::Tick).await
    }

    /// One scheduler second, without waiting; false when the mailbox is full or closed
    pub fn try_tick(&self) -> bool {
        self.sender.try_send(DriverCommand::Tick).is_ok()
    }

    /// Raise the emergency flag
    pub async fn trigger_emergency(&self, location: GeoPoint) -> Result<RideMachine> {
        self.apply(RideEvent::TriggerEmergency(location)).await
    }

    /// Lower the emergency flag
    pub async fn clear_emergency(&self) -> Result<RideMachine> {
        self.apply(RideEvent::ClearEmergency).await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(DriverCommand::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }

    /// Actor has stopped
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Spawn the actor for one driver
pub fn spawn_driver_actor(
    machine: RideMachine,
    ctx: DriverContext,
    mailbox_capacity: usize,
) -> DriverHandle {
    let driver_id = machine.driver_id().clone();
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = DriverActor::new(machine, ctx, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    DriverHandle::new(driver_id, tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RideConfig;
    use crate::storage::MemoryStore;
    use crate::types::{Address, DriverMetrics, RideId, RideState, Tier};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    struct Harness {
        handle: DriverHandle,
        store: Arc<MemoryStore>,
        metrics: Arc<Metrics>,
    }

    fn driver() -> AccountId {
        AccountId::new("driver-1")
    }

    fn platform() -> AccountId {
        AccountId::new("PLATFORM")
    }

    fn harness() -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 6, 12, 18, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let ctx = DriverContext {
            store: store.clone(),
            ledger: LedgerService::new(platform(), clock.clone()),
            clock,
            metrics: metrics.clone(),
        };
        let machine = RideMachine::new(driver(), RideConfig::default());
        Harness {
            handle: spawn_driver_actor(machine, ctx, 16),
            store,
            metrics,
        }
    }

    fn request() -> RideRequest {
        RideRequest {
            ride_id: RideId::new("ride-100"),
            rider_id: "rider-5".to_string(),
            rider_name: "Joao".to_string(),
            rider_rating: dec!(4.7),
            pickup: Address::new("Mercado Central, Maputo"),
            dropoff: Address::new("Costa do Sol, Maputo"),
            estimated_fare: dec!(480),
            estimated_duration_mins: 18,
            estimated_distance_km: dec!(7.2),
        }
    }

    async fn to_destination(handle: &DriverHandle) {
        handle.go_online().await.unwrap();
        handle.receive_offer(request()).await.unwrap();
        handle.accept_offer().await.unwrap();
        handle.arrived_at_pickup().await.unwrap();
        handle.rider_on_board().await.unwrap();
        let m = handle.arrived_at_destination().await.unwrap();
        assert_eq!(m.state(), RideState::ArrivedAtDestination);
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let h = harness();
        let m = h.handle.snapshot().await.unwrap();
        assert_eq!(m.state(), RideState::Offline);
        h.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_complete_ride_settles() {
        let h = harness();
        h.store
            .put_driver_metrics(
                &driver(),
                &DriverMetrics {
                    weekly_rides_completed: 120,
                    rating: dec!(4.92),
                    tier: Tier::Gold,
                },
            )
            .unwrap();
        to_destination(&h.handle).await;

        let m = h
            .handle
            .complete_ride(dec!(500), Some(5), Some("Muito simpatico".to_string()))
            .await
            .unwrap();

        assert_eq!(m.state(), RideState::TripSummary);
        let settlement = m.stats().last_settlement.clone().unwrap();
        assert_eq!(settlement.commission.tier, Tier::Gold);
        assert_eq!(settlement.commission.commission, dec!(60.00));
        assert_eq!(settlement.commission.payout, dec!(440.00));
        assert!(settlement.commission.instant_payout_eligible);
        assert_eq!(m.stats().earnings, dec!(440.00));
        assert_eq!(m.session().unwrap().actual_fare, Some(dec!(500.00)));

        assert_eq!(h.store.get_balance(&driver()).unwrap(), dec!(440.00));
        assert_eq!(h.store.get_balance(&platform()).unwrap(), dec!(60.00));

        let driver_entries = h.store.entries_for(&driver()).unwrap();
        assert_eq!(driver_entries.len(), 1);
        assert_eq!(driver_entries[0].hash(), &settlement.driver_entry);
        assert_eq!(
            h.store.get_driver_metrics(&driver()).unwrap().weekly_rides_completed,
            121
        );
        assert_eq!(h.metrics.rides_completed_total.get(), 1);
        assert_eq!(h.metrics.ledger_entries_total.get(), 2);
    }

    #[tokio::test]
    async fn test_double_complete_posts_once() {
        let h = harness();
        to_destination(&h.handle).await;

        h.handle.complete_ride(dec!(500), None, None).await.unwrap();
        let again = h.handle.complete_ride(dec!(500), None, None).await.unwrap();

        assert_eq!(again.state(), RideState::TripSummary);
        assert_eq!(again.stats().rides_completed, 1);
        assert_eq!(h.store.entries_for(&driver()).unwrap().len(), 1);
        // Bronze default: 17%
        assert_eq!(h.store.get_balance(&driver()).unwrap(), dec!(415.00));
    }

    #[tokio::test]
    async fn test_complete_outside_destination_creates_nothing() {
        let h = harness();
        h.handle.go_online().await.unwrap();
        h.handle.receive_offer(request()).await.unwrap();

        let m = h.handle.complete_ride(dec!(500), None, None).await.unwrap();
        assert_eq!(m.state(), RideState::OfferReceived);

        let m = h.handle.reject_offer().await.unwrap();
        assert_eq!(m.state(), RideState::Online);
        assert!(h.store.entries_for(&driver()).unwrap().is_empty());
        assert!(h.store.entries_for(&platform()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_fare_leaves_machine_unchanged() {
        let h = harness();
        to_destination(&h.handle).await;
        let before = h.handle.snapshot().await.unwrap();

        let err = h.handle.complete_ride(dec!(-5), None, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = h.handle.complete_ride(dec!(500), Some(6), None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        assert_eq!(h.handle.snapshot().await.unwrap(), before);
        assert!(h.store.entries_for(&driver()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsettled_completion_event_rejected() {
        let h = harness();
        to_destination(&h.handle).await;
        let before = h.handle.snapshot().await.unwrap();

        let completion = RideCompletion {
            actual_fare: dec!(1),
            actual_distance_km: None,
            rating: None,
            feedback: None,
            settlement: RideSettlement {
                ride_id: RideId::new("ride-100"),
                commission: commission::compute(dec!(1), &DriverMetrics::default()).unwrap(),
                driver_entry: crate::crypto::EntryHash::from_bytes([0; 32]),
                platform_entry: crate::crypto::EntryHash::from_bytes([0; 32]),
            },
        };
        let m = h.handle.apply(RideEvent::CompleteRide(completion)).await.unwrap();
        assert_eq!(m, before);
    }

    #[tokio::test]
    async fn test_ride_events_recorded() {
        let h = harness();
        h.handle.go_online().await.unwrap();
        h.handle.reject_offer().await.unwrap(); // ignored
        h.handle.receive_offer(request()).await.unwrap();
        h.handle.reject_offer().await.unwrap();

        let events = h.store.ride_events(&driver()).unwrap();
        let states: Vec<_> = events.iter().map(|e| e.state).collect();
        assert_eq!(
            states,
            vec![RideState::Online, RideState::OfferReceived, RideState::Online]
        );
        assert_eq!(events[1].ride_id, Some(RideId::new("ride-100")));
        assert_eq!(h.metrics.transitions_ignored_total.get(), 1);
    }

    #[tokio::test]
    async fn test_tick_drives_countdown() {
        let h = harness();
        h.handle.go_online().await.unwrap();
        h.handle.receive_offer(request()).await.unwrap();

        assert!(h.handle.try_tick());
        let m = h.handle.tick().await.unwrap();
        assert_eq!(m.offer_seconds_left(), 28);
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let h = harness();
        h.handle.shutdown().await.unwrap();
        tokio::task::yield_now().await;

        let err = h.handle.go_online().await.unwrap_err();
        assert!(matches!(err, Error::Concurrency(_)));
    }
}
