//! Ride Core
//!
//! Driver ride-lifecycle state machine plus the deterministic commission and
//! ledger engine that settles every completed ride.
//!
//! # Architecture
//!
//! - **Value-type FSM**: `(machine, event) → machine`, no ambient state
//! - **Single Writer**: one actor per driver serializes its transitions
//! - **Pure Commission Engine**: metrics + fare → tier, rate, split
//! - **Immutable Ledger**: hash-addressed entries, corrections by offsetting
//!
//! # Invariants
//!
//! - Money conservation: commission + payout == round2(fare) for every ride
//! - Atomic settlement: driver payout and platform commission commit together
//! - Idempotent rejection: an event whose guard fails changes nothing
//! - Append-only: entries are never modified or deleted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod clock;
pub mod commission;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fleet;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod money;
pub mod storage;
pub mod types;

// Re-exports
pub use actor::{spawn_driver_actor, DriverContext, DriverHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, RideConfig};
pub use crypto::EntryHash;
pub use error::{Error, Result};
pub use fleet::{spawn_scheduler, Fleet};
pub use ledger::{LedgerService, RideEntries};
pub use lifecycle::{RideCompletion, RideEvent, RideMachine};
pub use metrics::Metrics;
pub use storage::{open_store, AppendOutcome, LedgerStore, MemoryStore, RocksStore};
pub use types::{
    AccountId, AuditReport, CommissionOutput, Direction, DriverMetrics, LedgerEntry, ReasonCode,
    RideId, RideRequest, RideSession, RideState, Tier,
};
