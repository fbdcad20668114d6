//! Driver registry and one-second scheduler

use crate::{
    actor::{spawn_driver_actor, DriverContext, DriverHandle},
    clock::Clock,
    config::Config,
    ledger::LedgerService,
    lifecycle::RideMachine,
    metrics::Metrics,
    storage::open_store,
    types::AccountId,
    Error, Result,
};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// All driver actors in this process
#[derive(Debug)]
pub struct Fleet {
    drivers: DashMap<AccountId, DriverHandle>,
    ctx: DriverContext,
    config: Config,
}

impl Fleet {
    /// Empty fleet
    pub fn new(ctx: DriverContext, config: Config) -> Self {
        Self {
            drivers: DashMap::new(),
            ctx,
            config,
        }
    }

    /// Fleet on the store and platform account named by `config`
    pub fn from_config(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config.storage)?;
        let metrics = Metrics::new().map_err(|e| Error::Other(e.to_string()))?;
        let ledger = LedgerService::new(
            AccountId::new(config.ledger.platform_account.clone()),
            clock.clone(),
        );

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            backend = ?config.storage.backend,
            platform_account = %config.ledger.platform_account,
            currency = %config.ledger.currency,
            "Fleet configured"
        );

        let ctx = DriverContext {
            store,
            ledger,
            clock,
            metrics: Arc::new(metrics),
        };
        Ok(Self::new(ctx, config))
    }

    /// Shared store, ledger, clock and metrics
    pub fn context(&self) -> &DriverContext {
        &self.ctx
    }

    /// Handle for a driver, spawning its actor on first use
    pub fn handle_for(&self, driver_id: &AccountId) -> DriverHandle {
        if let Some(existing) = self.drivers.get(driver_id) {
            if !existing.is_closed() {
                return existing.clone();
            }
        }

        self.drivers
            .entry(driver_id.clone())
            .and_modify(|h| {
                if h.is_closed() {
                    *h = self.spawn(driver_id);
                }
            })
            .or_insert_with(|| self.spawn(driver_id))
            .clone()
    }

    /// Handle for a driver that already has an actor
    pub fn get(&self, driver_id: &AccountId) -> Result<DriverHandle> {
        self.drivers
            .get(driver_id)
            .map(|h| h.clone())
            .ok_or_else(|| Error::DriverNotFound(driver_id.to_string()))
    }

    /// Drivers with an actor
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// No drivers yet
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Send one tick to every driver; returns how many accepted it
    pub fn tick_all(&self) -> usize {
        let mut delivered = 0;
        for entry in self.drivers.iter() {
            if entry.value().try_tick() {
                delivered += 1;
            } else {
                tracing::warn!(driver_id = %entry.key(), "Tick dropped: mailbox full or closed");
            }
        }
        delivered
    }

    /// Stop one driver's actor and forget it
    pub async fn remove(&self, driver_id: &AccountId) -> Result<()> {
        let (_, handle) = self
            .drivers
            .remove(driver_id)
            .ok_or_else(|| Error::DriverNotFound(driver_id.to_string()))?;
        handle.shutdown().await
    }

    /// Stop every actor
    pub async fn shutdown(&self) {
        let handles: Vec<DriverHandle> = self.drivers.iter().map(|e| e.value().clone()).collect();
        self.drivers.clear();
        for handle in handles {
            if let Err(e) = handle.shutdown().await {
                tracing::debug!(
                    driver_id = %handle.driver_id(),
                    error = %e,
                    "Actor already stopped"
                );
            }
        }
        tracing::info!("Fleet shut down");
    }

    fn spawn(&self, driver_id: &AccountId) -> DriverHandle {
        tracing::debug!(driver_id = %driver_id, "Spawning driver actor");
        spawn_driver_actor(
            RideMachine::new(driver_id.clone(), self.config.ride.clone()),
            self.ctx.clone(),
            self.config.scheduler.mailbox_capacity,
        )
    }
}

/// Drive [`Fleet::tick_all`] from a fixed-period interval
pub fn spawn_scheduler(fleet: Arc<Fleet>) -> JoinHandle<()> {
    let period = Duration::from_millis(fleet.config.scheduler.tick_interval_ms);
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            fleet.tick_all();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::storage::{LedgerStore, MemoryStore};
    use crate::types::{Address, RideId, RideRequest, RideState};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn fleet(config: Config) -> Fleet {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 9, 1, 7, 0, 0).unwrap(),
        ));
        fleet_on(clock, Arc::new(MemoryStore::new()), config)
    }

    fn fleet_on(clock: Arc<dyn Clock>, store: Arc<dyn LedgerStore>, config: Config) -> Fleet {
        let ctx = DriverContext {
            store,
            ledger: LedgerService::new(AccountId::new("PLATFORM"), clock.clone()),
            clock,
            metrics: Arc::new(Metrics::new().unwrap()),
        };
        Fleet::new(ctx, config)
    }

    async fn to_destination(handle: &DriverHandle, ride: &str) {
        handle.go_online().await.unwrap();
        handle.receive_offer(offer(ride)).await.unwrap();
        handle.accept_offer().await.unwrap();
        handle.arrived_at_pickup().await.unwrap();
        handle.rider_on_board().await.unwrap();
        let m = handle.arrived_at_destination().await.unwrap();
        assert_eq!(m.state(), RideState::ArrivedAtDestination);
    }

    fn offer(ride: &str) -> RideRequest {
        RideRequest {
            ride_id: RideId::new(ride),
            rider_id: "rider-1".to_string(),
            rider_name: "Lina".to_string(),
            rider_rating: dec!(4.9),
            pickup: Address::new("Baixa, Maputo"),
            dropoff: Address::new("Matola"),
            estimated_fare: dec!(650),
            estimated_duration_mins: 35,
            estimated_distance_km: dec!(14),
        }
    }

    #[tokio::test]
    async fn test_handle_for_reuses_actor() {
        let fleet = fleet(Config::default());
        let a = fleet.handle_for(&AccountId::new("d1"));
        a.go_online().await.unwrap();

        let b = fleet.handle_for(&AccountId::new("d1"));
        assert_eq!(b.snapshot().await.unwrap().state(), RideState::Online);
        assert_eq!(fleet.len(), 1);

        assert!(fleet.get(&AccountId::new("d2")).is_err());
        fleet.shutdown().await;
        assert!(fleet.is_empty());
    }

    #[tokio::test]
    async fn test_tick_all_drives_every_driver() {
        let mut config = Config::default();
        config.ride.offer_countdown_secs = 2;
        let fleet = fleet(config);

        let d1 = fleet.handle_for(&AccountId::new("d1"));
        let d2 = fleet.handle_for(&AccountId::new("d2"));
        d1.go_online().await.unwrap();
        d1.receive_offer(offer("r1")).await.unwrap();
        d2.go_online().await.unwrap();

        assert_eq!(fleet.tick_all(), 2);
        assert_eq!(fleet.tick_all(), 2);

        // Snapshot is queued behind the ticks
        let m1 = d1.snapshot().await.unwrap();
        assert_eq!(m1.state(), RideState::Online);
        assert!(m1.session().is_none());
        assert_eq!(d2.snapshot().await.unwrap().state(), RideState::Online);
    }

    #[tokio::test]
    async fn test_remove_driver() {
        let fleet = fleet(Config::default());
        let id = AccountId::new("d1");
        fleet.handle_for(&id);
        fleet.remove(&id).await.unwrap();
        assert!(fleet.get(&id).is_err());
        assert!(matches!(fleet.remove(&id).await, Err(Error::DriverNotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_parallel_completions_all_settle() {
        let store = Arc::new(MemoryStore::new());
        let fleet = Arc::new(fleet_on(
            Arc::new(SystemClock),
            store.clone(),
            Config::default(),
        ));

        let ids: Vec<AccountId> = (0..100)
            .map(|i| AccountId::new(format!("driver-{}", i)))
            .collect();
        for (i, id) in ids.iter().enumerate() {
            to_destination(&fleet.handle_for(id), &format!("ride-{}", i)).await;
        }

        let tasks: Vec<_> = ids
            .iter()
            .map(|id| {
                let handle = fleet.handle_for(id);
                tokio::spawn(async move { handle.complete_ride(dec!(500), Some(5), None).await })
            })
            .collect();
        for task in tasks {
            let m = task.await.unwrap().unwrap();
            assert_eq!(m.state(), RideState::TripSummary);
        }

        let platform = AccountId::new("PLATFORM");
        assert_eq!(store.get_balance(&platform).unwrap(), dec!(8500.00));
        let entries = store.entries_for(&platform).unwrap();
        assert_eq!(entries.len(), 100);
        assert!(LedgerService::audit(&entries).is_valid);
        for id in &ids {
            assert_eq!(store.get_balance(id).unwrap(), dec!(415.00));
        }
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_same_instant_completions_both_settle() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 9, 1, 7, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::new());
        let fleet = fleet_on(clock, store.clone(), Config::default());

        let a = fleet.handle_for(&AccountId::new("driver-a"));
        let b = fleet.handle_for(&AccountId::new("driver-b"));
        to_destination(&a, "ride-a").await;
        to_destination(&b, "ride-b").await;

        let ma = a.complete_ride(dec!(500), None, None).await.unwrap();
        let mb = b.complete_ride(dec!(500), None, None).await.unwrap();
        assert_eq!(ma.state(), RideState::TripSummary);
        assert_eq!(mb.state(), RideState::TripSummary);

        let sa = ma.stats().last_settlement.clone().unwrap();
        let sb = mb.stats().last_settlement.clone().unwrap();
        assert_eq!(sa.platform_entry, sb.platform_entry);

        let platform = AccountId::new("PLATFORM");
        assert_eq!(store.get_balance(&platform).unwrap(), dec!(170.00));
        assert_eq!(store.entries_for(&platform).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_from_config_uses_platform_account() {
        let mut config = Config::default();
        config.ledger.platform_account = "PLATFORM-MZ".to_string();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 9, 1, 7, 0, 0).unwrap(),
        ));
        let fleet = Fleet::from_config(config, clock).unwrap();

        let d1 = fleet.handle_for(&AccountId::new("d1"));
        to_destination(&d1, "r1").await;
        d1.complete_ride(dec!(500), None, None).await.unwrap();

        let store = &fleet.context().store;
        assert_eq!(store.get_balance(&AccountId::new("PLATFORM-MZ")).unwrap(), dec!(85.00));
        assert_eq!(store.get_balance(&AccountId::new("PLATFORM")).unwrap(), dec!(0));
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = Config::default();
        config.scheduler.tick_interval_ms = 0;
        assert!(Fleet::from_config(config, Arc::new(SystemClock)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_ticks() {
        let fleet = Arc::new(fleet(Config::default()));
        let d1 = fleet.handle_for(&AccountId::new("d1"));
        d1.go_online().await.unwrap();
        d1.receive_offer(offer("r1")).await.unwrap();

        let scheduler = spawn_scheduler(fleet.clone());
        tokio::time::sleep(Duration::from_millis(3500)).await;

        let m = d1.snapshot().await.unwrap();
        // First interval tick fires immediately
        assert_eq!(m.offer_seconds_left(), 26);
        scheduler.abort();
    }
}
