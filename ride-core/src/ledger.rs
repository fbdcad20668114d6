//! Ledger service
//!
//! Builds immutable, hash-addressed entries and verifies sequences of them.
//! Nothing here mutates an entry once built; corrections are new offsetting
//! entries with reason `REFUND` or `SYSTEM_ADJUST`.
//!
//! # Example
//!
//! ```
//! use ride_core::{AccountId, LedgerService, RideId};
//! use rust_decimal::Decimal;
//!
//! let ledger = LedgerService::with_system_clock(AccountId::new("PLATFORM"));
//! let entries = ledger
//!     .create_ride_entries(
//!         &AccountId::new("driver-1"),
//!         &RideId::new("ride-1"),
//!         Decimal::from(500),
//!         Decimal::from(60),
//!         Decimal::from(440),
//!         Decimal::ZERO,
//!         Decimal::ZERO,
//!         Decimal::from(12),
//!     )
//!     .unwrap();
//! assert_eq!(entries.driver.balance_after(), Decimal::from(440));
//! assert_eq!(entries.platform.balance_after(), Decimal::from(60));
//! ```

use crate::{
    clock::{Clock, SystemClock},
    crypto::hash_entry,
    money::{ensure_postable, round2, to_fixed2},
    types::{
        AccountId, AuditReport, Direction, Discrepancy, DiscrepancyKind, LedgerEntry, ReasonCode,
        RideId, Severity, SubjectSummary,
    },
    Error, Result,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The two linked entries produced for one completed ride
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RideEntries {
    /// Driver payout credit
    pub driver: LedgerEntry,
    /// Platform commission credit
    pub platform: LedgerEntry,
}

/// Ledger entry factory and auditor
#[derive(Debug, Clone)]
pub struct LedgerService {
    /// Account that receives commission
    platform_account: AccountId,

    /// Timestamp source
    clock: Arc<dyn Clock>,
}

impl LedgerService {
    /// Create with an explicit clock
    pub fn new(platform_account: AccountId, clock: Arc<dyn Clock>) -> Self {
        Self {
            platform_account,
            clock,
        }
    }

    /// Create using wall-clock time
    pub fn with_system_clock(platform_account: AccountId) -> Self {
        Self::new(platform_account, Arc::new(SystemClock))
    }

    /// Platform commission account
    pub fn platform_account(&self) -> &AccountId {
        &self.platform_account
    }

    /// Build one entry against `current_balance`, stamped now
    pub fn create_entry(
        &self,
        subject: &AccountId,
        direction: Direction,
        reason: ReasonCode,
        amount: Decimal,
        current_balance: Decimal,
    ) -> Result<LedgerEntry> {
        self.create_entry_at(
            subject,
            direction,
            reason,
            amount,
            current_balance,
            None,
            self.clock.now(),
        )
    }

    /// Build one entry with an explicit ride reference and timestamp
    #[allow(clippy::too_many_arguments)]
    pub fn create_entry_at(
        &self,
        subject: &AccountId,
        direction: Direction,
        reason: ReasonCode,
        amount: Decimal,
        current_balance: Decimal,
        ride_id: Option<&RideId>,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        ensure_postable(amount)?;

        let balance_after = direction.apply(current_balance, amount);
        if direction == Direction::Debit && balance_after < Decimal::ZERO {
            return Err(Error::InsufficientBalance {
                subject: subject.to_string(),
                balance: current_balance,
                requested: amount,
            });
        }

        let memo = match ride_id {
            Some(ride) => format!("{:?} {} MZN for ride {}", reason, to_fixed2(amount), ride),
            None => format!("{:?} {} MZN", reason, to_fixed2(amount)),
        };

        let entry = LedgerEntry::new(
            subject.clone(),
            direction,
            reason,
            amount,
            ride_id.cloned(),
            current_balance,
            balance_after,
            at,
            memo,
        );

        tracing::debug!(
            subject = %subject,
            direction = ?direction,
            reason = ?reason,
            amount = %amount,
            hash = %entry.hash(),
            "Ledger entry created"
        );

        Ok(entry)
    }

    /// Build the driver payout and platform commission entries for a ride
    ///
    /// Checks `round2(payout + commission) == round2(fare)` before building
    /// anything; either both entries come back or neither does.
    #[allow(clippy::too_many_arguments)]
    pub fn create_ride_entries(
        &self,
        driver_id: &AccountId,
        ride_id: &RideId,
        fare: Decimal,
        commission: Decimal,
        payout: Decimal,
        driver_balance: Decimal,
        platform_balance: Decimal,
        rate_percent: Decimal,
    ) -> Result<RideEntries> {
        if round2(payout + commission) != round2(fare) {
            tracing::error!(
                driver_id = %driver_id,
                ride_id = %ride_id,
                fare = %fare,
                commission = %commission,
                payout = %payout,
                "FATAL: fare does not equal commission + payout"
            );
            return Err(Error::FareMismatch {
                fare: round2(fare),
                commission,
                payout,
            });
        }

        let at = self.clock.now();

        let mut driver = self.create_entry_at(
            driver_id,
            Direction::Credit,
            ReasonCode::RidePayout,
            payout,
            driver_balance,
            Some(ride_id),
            at,
        )?;
        driver = driver.with_memo(format!(
            "Ride {} payout: {} of {} MZN ({}% commission)",
            ride_id,
            to_fixed2(payout),
            to_fixed2(round2(fare)),
            rate_percent
        ));

        let mut platform = self.create_entry_at(
            &self.platform_account,
            Direction::Credit,
            ReasonCode::Commission,
            commission,
            platform_balance,
            Some(ride_id),
            at,
        )?;
        platform = platform.with_memo(format!(
            "Ride {} commission: {}% of {} MZN from driver {}",
            ride_id,
            rate_percent,
            to_fixed2(round2(fare)),
            driver_id
        ));

        tracing::info!(
            driver_id = %driver_id,
            ride_id = %ride_id,
            payout = %payout,
            commission = %commission,
            "Ride entries created"
        );

        Ok(RideEntries { driver, platform })
    }

    /// Offsetting entry that reverses `original`
    pub fn reverse_entry(
        &self,
        original: &LedgerEntry,
        current_balance: Decimal,
        reason: ReasonCode,
    ) -> Result<LedgerEntry> {
        if !reason.is_correction() {
            return Err(Error::InvalidInput(format!(
                "{:?} is not a correction reason",
                reason
            )));
        }

        let entry = self
            .create_entry_at(
                original.subject(),
                original.direction().opposite(),
                reason,
                original.amount(),
                current_balance,
                original.ride_id(),
                self.clock.now(),
            )?
            .with_memo(format!("Reversal of {}", original.hash()));

        tracing::info!(
            subject = %original.subject(),
            original = %original.hash(),
            reversal = %entry.hash(),
            "Ledger entry reversed"
        );

        Ok(entry)
    }

    /// Recompute one entry's hash and balance delta
    pub fn verify_entry(entry: &LedgerEntry) -> bool {
        check_entry(0, entry).is_empty()
    }

    /// Verify a sequence of entries and total it per subject
    ///
    /// Read-only: entries are never touched, and the report is advisory.
    pub fn audit(entries: &[LedgerEntry]) -> AuditReport {
        let mut discrepancies = Vec::new();
        let mut subjects: BTreeMap<AccountId, SubjectSummary> = BTreeMap::new();

        for (index, entry) in entries.iter().enumerate() {
            discrepancies.extend(check_entry(index, entry));

            match subjects.get_mut(entry.subject()) {
                Some(summary) => {
                    if summary.closing_balance != entry.balance_before() {
                        discrepancies.push(Discrepancy {
                            index,
                            entry_hash: *entry.hash(),
                            subject: entry.subject().clone(),
                            kind: DiscrepancyKind::ChainBreak,
                            severity: Severity::Medium,
                            detail: format!(
                                "balance_before {} does not follow previous balance_after {}",
                                entry.balance_before(),
                                summary.closing_balance
                            ),
                        });
                    }
                    accumulate(summary, entry);
                }
                None => {
                    let mut summary = SubjectSummary {
                        subject: entry.subject().clone(),
                        total_credits: Decimal::ZERO,
                        total_debits: Decimal::ZERO,
                        net_movement: Decimal::ZERO,
                        net_balance: entry.balance_before(),
                        opening_balance: entry.balance_before(),
                        closing_balance: entry.balance_before(),
                        entry_count: 0,
                    };
                    accumulate(&mut summary, entry);
                    subjects.insert(entry.subject().clone(), summary);
                }
            }
        }

        if !discrepancies.is_empty() {
            tracing::warn!(
                entries = entries.len(),
                discrepancies = discrepancies.len(),
                "Ledger audit found discrepancies"
            );
        }

        AuditReport {
            subjects: subjects.into_values().collect(),
            is_valid: discrepancies.is_empty(),
            discrepancies,
            entries_checked: entries.len(),
        }
    }
}

fn accumulate(summary: &mut SubjectSummary, entry: &LedgerEntry) {
    match entry.direction() {
        Direction::Credit => summary.total_credits += entry.amount(),
        Direction::Debit => summary.total_debits += entry.amount(),
    }
    summary.net_movement = summary.total_credits - summary.total_debits;
    summary.net_balance = summary.opening_balance + summary.net_movement;
    summary.closing_balance = entry.balance_after();
    summary.entry_count += 1;
}

fn check_entry(index: usize, entry: &LedgerEntry) -> Vec<Discrepancy> {
    let mut found = Vec::new();

    let expected_hash = hash_entry(
        entry.subject(),
        entry.amount(),
        entry.direction(),
        entry.created_at(),
    );
    if !expected_hash.verify(entry.hash()) {
        found.push(Discrepancy {
            index,
            entry_hash: *entry.hash(),
            subject: entry.subject().clone(),
            kind: DiscrepancyKind::HashMismatch,
            severity: Severity::High,
            detail: format!("stored hash {} recomputes to {}", entry.hash(), expected_hash),
        });
    }

    let expected_after = entry.direction().apply(entry.balance_before(), entry.amount());
    if expected_after != entry.balance_after() {
        found.push(Discrepancy {
            index,
            entry_hash: *entry.hash(),
            subject: entry.subject().clone(),
            kind: DiscrepancyKind::BalanceMismatch,
            severity: Severity::High,
            detail: format!(
                "balance_after {} but {} {:?} {} gives {}",
                entry.balance_after(),
                entry.balance_before(),
                entry.direction(),
                entry.amount(),
                expected_after
            ),
        });
    }

    found
}
