//! Core types for the ride core
//!
//! All types are designed for:
//! - Deterministic serialization (bincode for storage, JSON for snapshots)
//! - Exact arithmetic (Decimal for money and ratings)
//! - Value semantics (snapshots compare field-by-field)

use crate::crypto::{hash_entry, EntryHash};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Ledger subject identifier (driver id or the platform account)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ride identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RideId(String);

impl RideId {
    /// Create from an existing id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh time-ordered id (UUIDv7)
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Driver lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum RideState {
    /// Not accepting offers
    Offline = 1,
    /// Waiting for an offer
    Online = 2,
    /// Offer on screen, countdown running
    OfferReceived = 3,
    /// Driving to the rider
    NavigatingToPickup = 4,
    /// At pickup, waiting timer running
    ArrivedAtPickup = 5,
    /// Rider aboard
    RideInProgress = 6,
    /// At dropoff, awaiting completion
    ArrivedAtDestination = 7,
    /// Ride settled, summary on screen
    TripSummary = 8,
}

impl RideState {
    /// Wire/log label
    pub fn as_str(&self) -> &'static str {
        match self {
            RideState::Offline => "OFFLINE",
            RideState::Online => "ONLINE",
            RideState::OfferReceived => "OFFER_RECEIVED",
            RideState::NavigatingToPickup => "NAVIGATING_TO_PICKUP",
            RideState::ArrivedAtPickup => "ARRIVED_AT_PICKUP",
            RideState::RideInProgress => "RIDE_IN_PROGRESS",
            RideState::ArrivedAtDestination => "ARRIVED_AT_DESTINATION",
            RideState::TripSummary => "TRIP_SUMMARY",
        }
    }

    /// States in which a ride session exists
    pub fn has_session(&self) -> bool {
        !matches!(self, RideState::Offline | RideState::Online)
    }
}

impl fmt::Display for RideState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WGS84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
}

/// Street address with optional coordinate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    /// Human-readable label
    pub label: String,
    /// Geocoded point, if known
    pub location: Option<GeoPoint>,
}

impl Address {
    /// Address without a coordinate
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            location: None,
        }
    }
}

/// Incoming ride offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    /// Ride id assigned by dispatch
    pub ride_id: RideId,
    /// Rider identity
    pub rider_id: String,
    /// Rider display name
    pub rider_name: String,
    /// Rider rating (1.0 - 5.0)
    pub rider_rating: Decimal,
    /// Pickup address
    pub pickup: Address,
    /// Dropoff address
    pub dropoff: Address,
    /// Quoted fare in MZN
    pub estimated_fare: Decimal,
    /// Quoted duration in minutes
    pub estimated_duration_mins: u32,
    /// Quoted distance in kilometres
    pub estimated_distance_km: Decimal,
}

/// The single in-flight ride
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideSession {
    /// Ride id
    pub ride_id: RideId,
    /// Rider identity
    pub rider_id: String,
    /// Rider display name
    pub rider_name: String,
    /// Rider rating
    pub rider_rating: Decimal,
    /// Pickup address
    pub pickup: Address,
    /// Dropoff address
    pub dropoff: Address,
    /// Quoted fare, including any waiting fee
    pub estimated_fare: Decimal,
    /// Quoted duration in minutes
    pub estimated_duration_mins: u32,
    /// Quoted distance in kilometres
    pub estimated_distance_km: Decimal,
    /// Waiting fee folded into the fare
    pub waiting_fee: Decimal,
    /// Settled fare
    pub actual_fare: Option<Decimal>,
    /// Actual duration in minutes
    pub actual_duration_mins: Option<u32>,
    /// Actual distance in kilometres
    pub actual_distance_km: Option<Decimal>,
    /// When the offer arrived
    pub offered_at: DateTime<Utc>,
    /// When the rider boarded
    pub started_at: Option<DateTime<Utc>>,
    /// When the ride was completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Driver's rating of the rider (1-5)
    pub rating: Option<u8>,
    /// Driver's free-text feedback
    pub feedback: Option<String>,
}

impl RideSession {
    /// Open a session from an offer
    pub fn from_request(request: RideRequest, offered_at: DateTime<Utc>) -> Self {
        Self {
            ride_id: request.ride_id,
            rider_id: request.rider_id,
            rider_name: request.rider_name,
            rider_rating: request.rider_rating,
            pickup: request.pickup,
            dropoff: request.dropoff,
            estimated_fare: request.estimated_fare,
            estimated_duration_mins: request.estimated_duration_mins,
            estimated_distance_km: request.estimated_distance_km,
            waiting_fee: Decimal::ZERO,
            actual_fare: None,
            actual_duration_mins: None,
            actual_distance_km: None,
            offered_at,
            started_at: None,
            completed_at: None,
            rating: None,
            feedback: None,
        }
    }
}

/// Pickup waiting timer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingTimer {
    /// When waiting began (None = not running)
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds waited so far
    pub elapsed_secs: u32,
    /// Waiting fee already added
    pub fee_applied: bool,
    /// Last ride ended as a no-show
    pub no_show_cancelled: bool,
}

impl WaitingTimer {
    /// Timer is counting
    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }
}

/// Emergency side channel, orthogonal to the lifecycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmergencyFlag {
    /// Emergency raised
    pub active: bool,
    /// Last known location when raised
    pub location: Option<GeoPoint>,
    /// When it was raised
    pub raised_at: Option<DateTime<Utc>>,
}

/// Driver class of service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// Default tier
    Bronze,
    /// 50+ weekly rides or 4.8+ rating
    Silver,
    /// 100+ weekly rides or 4.9+ rating
    Gold,
}

impl Tier {
    /// Wire label
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "BRONZE",
            Tier::Silver => "SILVER",
            Tier::Gold => "GOLD",
        }
    }

    /// Commission rate in percent
    pub fn rate_percent(&self) -> Decimal {
        match self {
            Tier::Bronze => Decimal::from(17),
            Tier::Silver => Decimal::from(15),
            Tier::Gold => Decimal::from(12),
        }
    }

    /// Gold drivers may cash out immediately
    pub fn instant_payout_eligible(&self) -> bool {
        matches!(self, Tier::Gold)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Performance metrics used for tier selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverMetrics {
    /// Rides completed this week
    pub weekly_rides_completed: u32,
    /// Average rating (1.0 - 5.0)
    pub rating: Decimal,
    /// Tier currently on file
    pub tier: Tier,
}

impl Default for DriverMetrics {
    fn default() -> Self {
        Self {
            weekly_rides_completed: 3,
            rating: Decimal::new(45, 1),
            tier: Tier::Bronze,
        }
    }
}

/// Commission decision for one fare
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionOutput {
    /// Fare rounded to currency precision
    pub fare: Decimal,
    /// Platform commission
    pub commission: Decimal,
    /// Driver payout
    pub payout: Decimal,
    /// Tier applied
    pub tier: Tier,
    /// Rate in percent
    pub rate_percent: Decimal,
    /// Why this tier applied
    pub reason: String,
    /// Driver may cash out immediately
    pub instant_payout_eligible: bool,
}

/// Ledger posting direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Increases the balance
    Credit,
    /// Decreases the balance
    Debit,
}

impl Direction {
    /// Sign byte used in the content hash
    pub fn sign_byte(&self) -> u8 {
        match self {
            Direction::Credit => b'+',
            Direction::Debit => b'-',
        }
    }

    /// Opposite direction, for offsetting entries
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Credit => Direction::Debit,
            Direction::Debit => Direction::Credit,
        }
    }

    /// Apply to a balance
    pub fn apply(&self, balance: Decimal, amount: Decimal) -> Decimal {
        match self {
            Direction::Credit => balance + amount,
            Direction::Debit => balance - amount,
        }
    }
}

/// Why an entry was posted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// Driver's share of a fare
    RidePayout,
    /// Platform's share of a fare
    Commission,
    /// Pickup waiting fee
    WaitingFee,
    /// Reversal of an earlier entry
    Refund,
    /// Manual correction
    SystemAdjust,
    /// Driver cash-out
    Withdrawal,
    /// Gold-tier immediate cash-out
    InstantPayout,
}

impl ReasonCode {
    /// Wire label
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::RidePayout => "RIDE_PAYOUT",
            ReasonCode::Commission => "COMMISSION",
            ReasonCode::WaitingFee => "WAITING_FEE",
            ReasonCode::Refund => "REFUND",
            ReasonCode::SystemAdjust => "SYSTEM_ADJUST",
            ReasonCode::Withdrawal => "WITHDRAWAL",
            ReasonCode::InstantPayout => "INSTANT_PAYOUT",
        }
    }

    /// Reasons allowed on offsetting entries
    pub fn is_correction(&self) -> bool {
        matches!(self, ReasonCode::Refund | ReasonCode::SystemAdjust)
    }
}

/// Immutable financial fact
///
/// Fields are private; an entry can only be built by the ledger service or
/// read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    subject: AccountId,
    direction: Direction,
    reason: ReasonCode,
    amount: Decimal,
    hash: EntryHash,
    ride_id: Option<RideId>,
    balance_before: Decimal,
    balance_after: Decimal,
    created_at: DateTime<Utc>,
    memo: String,
}

impl LedgerEntry {
    // Only the ledger service calls this; it has already validated the inputs.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        subject: AccountId,
        direction: Direction,
        reason: ReasonCode,
        amount: Decimal,
        ride_id: Option<RideId>,
        balance_before: Decimal,
        balance_after: Decimal,
        created_at: DateTime<Utc>,
        memo: String,
    ) -> Self {
        let hash = hash_entry(&subject, amount, direction, created_at);
        Self {
            subject,
            direction,
            reason,
            amount,
            hash,
            ride_id,
            balance_before,
            balance_after,
            created_at,
            memo,
        }
    }

    pub(crate) fn with_memo(mut self, memo: String) -> Self {
        self.memo = memo;
        self
    }

    /// Subject whose balance moves
    pub fn subject(&self) -> &AccountId {
        &self.subject
    }

    /// Credit or debit
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Reason code
    pub fn reason(&self) -> ReasonCode {
        self.reason
    }

    /// Amount (always non-negative)
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Stored content hash
    pub fn hash(&self) -> &EntryHash {
        &self.hash
    }

    /// Associated ride
    pub fn ride_id(&self) -> Option<&RideId> {
        self.ride_id.as_ref()
    }

    /// Balance before posting
    pub fn balance_before(&self) -> Decimal {
        self.balance_before
    }

    /// Balance after posting
    pub fn balance_after(&self) -> Decimal {
        self.balance_after
    }

    /// Creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Free-text description, not covered by the hash
    pub fn memo(&self) -> &str {
        &self.memo
    }

    /// Signed balance movement
    pub fn signed_amount(&self) -> Decimal {
        self.direction.apply(Decimal::ZERO, self.amount)
    }
}

/// Outcome of a ride settlement, kept for the trip summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideSettlement {
    /// Ride settled
    pub ride_id: RideId,
    /// Commission decision
    pub commission: CommissionOutput,
    /// Driver payout entry hash
    pub driver_entry: EntryHash,
    /// Platform commission entry hash
    pub platform_entry: EntryHash,
}

/// Audit finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational
    Low,
    /// Chain continuity problem
    Medium,
    /// Hash or balance arithmetic mismatch
    High,
}

/// What an audit found wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyKind {
    /// Stored hash differs from the recomputed one
    HashMismatch,
    /// balance_after ≠ balance_before ± amount
    BalanceMismatch,
    /// balance_before ≠ previous balance_after for the same subject
    ChainBreak,
}

/// One audit finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Position of the entry in the audited sequence
    pub index: usize,
    /// Entry's stored hash
    pub entry_hash: EntryHash,
    /// Subject of the entry
    pub subject: AccountId,
    /// Kind of mismatch
    pub kind: DiscrepancyKind,
    /// Severity
    pub severity: Severity,
    /// Human-readable detail
    pub detail: String,
}

/// Per-subject totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSummary {
    /// Subject
    pub subject: AccountId,
    /// Σ credits
    pub total_credits: Decimal,
    /// Σ debits
    pub total_debits: Decimal,
    /// Σ credits − Σ debits
    pub net_movement: Decimal,
    /// opening balance + Σ credits − Σ debits
    pub net_balance: Decimal,
    /// balance_before of the first entry
    pub opening_balance: Decimal,
    /// balance_after of the last entry
    pub closing_balance: Decimal,
    /// Entries seen
    pub entry_count: usize,
}

/// Result of an audit pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Per-subject totals, sorted by subject
    pub subjects: Vec<SubjectSummary>,
    /// Findings
    pub discrepancies: Vec<Discrepancy>,
    /// Entries audited
    pub entries_checked: usize,
    /// No discrepancies found
    pub is_valid: bool,
}

impl AuditReport {
    /// Summary for one subject
    pub fn subject(&self, subject: &AccountId) -> Option<&SubjectSummary> {
        self.subjects.iter().find(|s| &s.subject == subject)
    }
}

/// Audit-trail record of a state entered by a driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideEventRecord {
    /// Driver
    pub driver_id: AccountId,
    /// State entered
    pub state: RideState,
    /// Ride in flight, if any
    pub ride_id: Option<RideId>,
    /// When it was entered
    pub at: DateTime<Utc>,
}
