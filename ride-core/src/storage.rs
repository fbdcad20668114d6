//! Persistence collaborator
//!
//! The core only needs balances, driver metrics, an idempotent entry log
//! and a ride-event audit trail. [`LedgerStore`] captures that contract;
//! [`MemoryStore`] backs tests and demos, [`RocksStore`] backs production.
//!
//! Entries are deduplicated by hash narrowed to the reason and ride they
//! belong to: two rides that settle the same commission in the same instant
//! hash identically for the platform account but are distinct entries.
//!
//! # Column Families (RocksDB)
//!
//! - `entries` - Ledger entries (key: entry key, see [`entry_key`])
//! - `indices` - Per-subject entry order (key: subject || 0x00 || seq)
//! - `balances` - Running balance per subject (key: subject)
//! - `metrics` - Driver metrics (key: driver id)
//! - `ride_events` - Ride state audit trail (key: driver || 0x00 || seq)

use crate::{
    config::StorageConfig,
    error::{Error, Result},
    ledger::RideEntries,
    types::{AccountId, DriverMetrics, LedgerEntry, RideEventRecord, Tier},
};
use parking_lot::{Mutex, RwLock};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction as IterDirection, IteratorMode, Options,
    WriteBatch, DB,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Column family names
const CF_ENTRIES: &str = "entries";
const CF_INDICES: &str = "indices";
const CF_BALANCES: &str = "balances";
const CF_METRICS: &str = "metrics";
const CF_RIDE_EVENTS: &str = "ride_events";

/// Result of appending a single entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Entry written, balance moved
    Appended,
    /// Same entry already stored; nothing written
    Duplicate,
}

/// Builds a ride's entry pair from `(driver_balance, platform_balance)`
pub type RideEntryBuilder<'a> = dyn FnMut(Decimal, Decimal) -> Result<RideEntries> + 'a;

/// What the ride core requires from storage
pub trait LedgerStore: Send + Sync + fmt::Debug {
    /// Current balance (zero for an unknown subject)
    fn get_balance(&self, subject: &AccountId) -> Result<Decimal>;

    /// Metrics on file, or the default for a new driver
    fn get_driver_metrics(&self, driver: &AccountId) -> Result<DriverMetrics>;

    /// Replace a driver's metrics
    fn put_driver_metrics(&self, driver: &AccountId, metrics: &DriverMetrics) -> Result<()>;

    /// Count one completed ride and record the tier it settled under
    fn record_completed_ride(&self, driver: &AccountId, tier: Tier) -> Result<DriverMetrics>;

    /// Append one entry, deduplicated by [`entry_key`]
    ///
    /// Fails with [`Error::Conflict`] when `balance_before` no longer matches
    /// the stored balance.
    fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<AppendOutcome>;

    /// Append a ride's driver and platform entries as one atomic write
    fn append_ride_entries(&self, entries: &RideEntries) -> Result<AppendOutcome>;

    /// Read both balances, build the pair and commit it in one critical section
    ///
    /// The builder sees the balances as they stand at commit time, so rides
    /// for other drivers crediting the same platform account never leave it
    /// stale.
    fn settle_ride(
        &self,
        driver: &AccountId,
        platform: &AccountId,
        build: &mut RideEntryBuilder<'_>,
    ) -> Result<(RideEntries, AppendOutcome)>;

    /// Entries for one subject, in append order
    fn entries_for(&self, subject: &AccountId) -> Result<Vec<LedgerEntry>>;

    /// Record a state entered by a driver
    fn append_ride_event(&self, record: &RideEventRecord) -> Result<()>;

    /// Ride events for one driver, oldest first
    fn ride_events(&self, driver: &AccountId) -> Result<Vec<RideEventRecord>>;
}

/// Open the backend named by the config
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn LedgerStore>> {
    match config.backend {
        crate::config::StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        crate::config::StorageBackend::RocksDb => Ok(Arc::new(RocksStore::open(config)?)),
    }
}

/// Idempotency key: `hash || reason || 0x00 || ride_id`
pub fn entry_key(entry: &LedgerEntry) -> Vec<u8> {
    let mut key = entry.hash().as_bytes().to_vec();
    key.extend_from_slice(entry.reason().as_str().as_bytes());
    key.push(0);
    if let Some(ride_id) = entry.ride_id() {
        key.extend_from_slice(ride_id.as_str().as_bytes());
    }
    key
}

fn check_chain(entry: &LedgerEntry, stored: Decimal) -> Result<()> {
    if entry.balance_before() != stored {
        return Err(Error::Conflict(format!(
            "entry {} expects balance {} for {} but store holds {}",
            entry.hash(),
            entry.balance_before(),
            entry.subject(),
            stored
        )));
    }
    Ok(())
}

fn check_pair(entries: &RideEntries) -> Result<()> {
    if entries.driver.subject() == entries.platform.subject() {
        return Err(Error::InvalidInput(format!(
            "driver and platform entries share subject {}",
            entries.driver.subject()
        )));
    }
    Ok(())
}

fn check_stored(have_driver: bool, have_platform: bool) -> Result<Option<AppendOutcome>> {
    match (have_driver, have_platform) {
        (true, true) => Ok(Some(AppendOutcome::Duplicate)),
        (false, false) => Ok(None),
        _ => Err(Error::Conflict(
            "only one entry of the ride pair is stored".to_string(),
        )),
    }
}

fn bump(mut metrics: DriverMetrics, tier: Tier) -> DriverMetrics {
    metrics.weekly_rides_completed = metrics.weekly_rides_completed.saturating_add(1);
    metrics.tier = tier;
    metrics
}

// In-memory backend

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<Vec<u8>, LedgerEntry>,
    order: HashMap<AccountId, Vec<Vec<u8>>>,
    balances: HashMap<AccountId, Decimal>,
    metrics: HashMap<AccountId, DriverMetrics>,
    ride_events: HashMap<AccountId, Vec<RideEventRecord>>,
}

impl MemoryInner {
    fn balance(&self, subject: &AccountId) -> Decimal {
        self.balances.get(subject).copied().unwrap_or(Decimal::ZERO)
    }

    fn contains(&self, entry: &LedgerEntry) -> bool {
        self.entries.contains_key(&entry_key(entry))
    }

    fn insert(&mut self, entry: &LedgerEntry) {
        let key = entry_key(entry);
        self.order
            .entry(entry.subject().clone())
            .or_default()
            .push(key.clone());
        self.entries.insert(key, entry.clone());
        self.balances
            .insert(entry.subject().clone(), entry.balance_after());
    }

    fn append_pair(&mut self, entries: &RideEntries) -> Result<AppendOutcome> {
        check_pair(entries)?;
        if let Some(outcome) =
            check_stored(self.contains(&entries.driver), self.contains(&entries.platform))?
        {
            return Ok(outcome);
        }

        check_chain(&entries.driver, self.balance(entries.driver.subject()))?;
        check_chain(&entries.platform, self.balance(entries.platform.subject()))?;

        self.insert(&entries.driver);
        self.insert(&entries.platform);
        Ok(AppendOutcome::Appended)
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn get_balance(&self, subject: &AccountId) -> Result<Decimal> {
        Ok(self.inner.read().balance(subject))
    }

    fn get_driver_metrics(&self, driver: &AccountId) -> Result<DriverMetrics> {
        Ok(self
            .inner
            .read()
            .metrics
            .get(driver)
            .cloned()
            .unwrap_or_default())
    }

    fn put_driver_metrics(&self, driver: &AccountId, metrics: &DriverMetrics) -> Result<()> {
        self.inner
            .write()
            .metrics
            .insert(driver.clone(), metrics.clone());
        Ok(())
    }

    fn record_completed_ride(&self, driver: &AccountId, tier: Tier) -> Result<DriverMetrics> {
        let mut inner = self.inner.write();
        let current = inner.metrics.get(driver).cloned().unwrap_or_default();
        let updated = bump(current, tier);
        inner.metrics.insert(driver.clone(), updated.clone());
        Ok(updated)
    }

    fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<AppendOutcome> {
        let mut inner = self.inner.write();
        if inner.contains(entry) {
            return Ok(AppendOutcome::Duplicate);
        }
        check_chain(entry, inner.balance(entry.subject()))?;
        inner.insert(entry);
        Ok(AppendOutcome::Appended)
    }

    fn append_ride_entries(&self, entries: &RideEntries) -> Result<AppendOutcome> {
        self.inner.write().append_pair(entries)
    }

    fn settle_ride(
        &self,
        driver: &AccountId,
        platform: &AccountId,
        build: &mut RideEntryBuilder<'_>,
    ) -> Result<(RideEntries, AppendOutcome)> {
        let mut inner = self.inner.write();
        let entries = build(inner.balance(driver), inner.balance(platform))?;
        let outcome = inner.append_pair(&entries)?;
        Ok((entries, outcome))
    }

    fn entries_for(&self, subject: &AccountId) -> Result<Vec<LedgerEntry>> {
        let inner = self.inner.read();
        Ok(inner
            .order
            .get(subject)
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| inner.entries.get(k).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn append_ride_event(&self, record: &RideEventRecord) -> Result<()> {
        self.inner
            .write()
            .ride_events
            .entry(record.driver_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn ride_events(&self, driver: &AccountId) -> Result<Vec<RideEventRecord>> {
        Ok(self
            .inner
            .read()
            .ride_events
            .get(driver)
            .cloned()
            .unwrap_or_default())
    }
}

// RocksDB backend

/// Stored per subject: running balance plus the next index sequence
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct BalanceRecord {
    balance: Decimal,
    entry_count: u64,
}

/// RocksDB-backed store
pub struct RocksStore {
    db: DB,
    // Serializes read-check-write of balances
    write_lock: Mutex<()>,
}

impl fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_compressed()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_BALANCES, Options::default()),
            ColumnFamilyDescriptor::new(CF_METRICS, Options::default()),
            ColumnFamilyDescriptor::new(CF_RIDE_EVENTS, Self::cf_options_compressed()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        tracing::info!(path = ?path, "Opened RocksDB ledger store");

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options_compressed() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn prefix(id: &AccountId) -> Vec<u8> {
        let mut key = id.as_str().as_bytes().to_vec();
        key.push(0);
        key
    }

    fn seq_key(id: &AccountId, seq: u64) -> Vec<u8> {
        let mut key = Self::prefix(id);
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn balance_record(&self, subject: &AccountId) -> Result<BalanceRecord> {
        let cf = self.cf_handle(CF_BALANCES)?;
        match self.db.get_cf(cf, subject.as_str().as_bytes())? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(BalanceRecord::default()),
        }
    }

    fn has_entry(&self, entry: &LedgerEntry) -> Result<bool> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        Ok(self.db.get_cf(cf, entry_key(entry))?.is_some())
    }

    // Stages one entry plus its index and balance update
    fn stage_entry(
        &self,
        batch: &mut WriteBatch,
        entry: &LedgerEntry,
        record: BalanceRecord,
    ) -> Result<()> {
        check_chain(entry, record.balance)?;

        let key = entry_key(entry);
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        batch.put_cf(cf_entries, &key, bincode::serialize(entry)?);

        let cf_indices = self.cf_handle(CF_INDICES)?;
        batch.put_cf(
            cf_indices,
            Self::seq_key(entry.subject(), record.entry_count),
            &key,
        );

        let next = BalanceRecord {
            balance: entry.balance_after(),
            entry_count: record.entry_count + 1,
        };
        let cf_balances = self.cf_handle(CF_BALANCES)?;
        batch.put_cf(
            cf_balances,
            entry.subject().as_str().as_bytes(),
            bincode::serialize(&next)?,
        );
        Ok(())
    }

    // Caller holds `write_lock`
    fn commit_pair(&self, entries: &RideEntries) -> Result<AppendOutcome> {
        check_pair(entries)?;
        if let Some(outcome) =
            check_stored(self.has_entry(&entries.driver)?, self.has_entry(&entries.platform)?)?
        {
            return Ok(outcome);
        }

        let driver_record = self.balance_record(entries.driver.subject())?;
        let platform_record = self.balance_record(entries.platform.subject())?;

        let mut batch = WriteBatch::default();
        self.stage_entry(&mut batch, &entries.driver, driver_record)?;
        self.stage_entry(&mut batch, &entries.platform, platform_record)?;
        self.db.write(batch)?;

        tracing::debug!(
            driver = %entries.driver.subject(),
            driver_entry = %entries.driver.hash(),
            platform_entry = %entries.platform.hash(),
            "Ride entries stored"
        );
        Ok(AppendOutcome::Appended)
    }

    fn scan_prefix(&self, cf: &ColumnFamily, prefix: &[u8]) -> Result<Vec<Box<[u8]>>> {
        let mut values = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, IterDirection::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(value);
        }
        Ok(values)
    }
}

impl LedgerStore for RocksStore {
    fn get_balance(&self, subject: &AccountId) -> Result<Decimal> {
        Ok(self.balance_record(subject)?.balance)
    }

    fn get_driver_metrics(&self, driver: &AccountId) -> Result<DriverMetrics> {
        let cf = self.cf_handle(CF_METRICS)?;
        match self.db.get_cf(cf, driver.as_str().as_bytes())? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(DriverMetrics::default()),
        }
    }

    fn put_driver_metrics(&self, driver: &AccountId, metrics: &DriverMetrics) -> Result<()> {
        let cf = self.cf_handle(CF_METRICS)?;
        self.db
            .put_cf(cf, driver.as_str().as_bytes(), bincode::serialize(metrics)?)?;
        Ok(())
    }

    fn record_completed_ride(&self, driver: &AccountId, tier: Tier) -> Result<DriverMetrics> {
        let _guard = self.write_lock.lock();
        let updated = bump(self.get_driver_metrics(driver)?, tier);
        self.put_driver_metrics(driver, &updated)?;
        Ok(updated)
    }

    fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<AppendOutcome> {
        let _guard = self.write_lock.lock();
        if self.has_entry(entry)? {
            return Ok(AppendOutcome::Duplicate);
        }

        let mut batch = WriteBatch::default();
        self.stage_entry(&mut batch, entry, self.balance_record(entry.subject())?)?;
        self.db.write(batch)?;

        tracing::debug!(subject = %entry.subject(), hash = %entry.hash(), "Ledger entry stored");
        Ok(AppendOutcome::Appended)
    }

    fn append_ride_entries(&self, entries: &RideEntries) -> Result<AppendOutcome> {
        let _guard = self.write_lock.lock();
        self.commit_pair(entries)
    }

    fn settle_ride(
        &self,
        driver: &AccountId,
        platform: &AccountId,
        build: &mut RideEntryBuilder<'_>,
    ) -> Result<(RideEntries, AppendOutcome)> {
        let _guard = self.write_lock.lock();
        let driver_balance = self.balance_record(driver)?.balance;
        let platform_balance = self.balance_record(platform)?.balance;
        let entries = build(driver_balance, platform_balance)?;
        let outcome = self.commit_pair(&entries)?;
        Ok((entries, outcome))
    }

    fn entries_for(&self, subject: &AccountId) -> Result<Vec<LedgerEntry>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let cf_entries = self.cf_handle(CF_ENTRIES)?;

        let mut entries = Vec::new();
        for key in self.scan_prefix(cf_indices, &Self::prefix(subject))? {
            let bytes = self.db.get_cf(cf_entries, &key)?.ok_or_else(|| {
                Error::Storage(format!("index points at missing entry {}", hex::encode(&key)))
            })?;
            entries.push(bincode::deserialize(&bytes)?);
        }
        Ok(entries)
    }

    fn append_ride_event(&self, record: &RideEventRecord) -> Result<()> {
        let _guard = self.write_lock.lock();
        let cf = self.cf_handle(CF_RIDE_EVENTS)?;
        let seq = self.scan_prefix(cf, &Self::prefix(&record.driver_id))?.len() as u64;
        self.db.put_cf(
            cf,
            Self::seq_key(&record.driver_id, seq),
            bincode::serialize(record)?,
        )?;
        Ok(())
    }

    fn ride_events(&self, driver: &AccountId) -> Result<Vec<RideEventRecord>> {
        let cf = self.cf_handle(CF_RIDE_EVENTS)?;
        self.scan_prefix(cf, &Self::prefix(driver))?
            .iter()
            .map(|bytes| Ok(bincode::deserialize(bytes)?))
            .collect()
    }
}
