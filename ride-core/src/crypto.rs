//! Content hashing for ledger entries
//!
//! This module provides:
//! - SHA-256 content hashes over an entry's identifying fields
//! - Hex rendering for storage keys and API output
//! - Constant-time hash comparison

use crate::money::to_fixed2;
use crate::types::{AccountId, Direction};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

/// 32-byte SHA-256 content hash of a ledger entry
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHash([u8; 32]);

impl EntryHash {
    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from 64 hex characters
    pub fn from_hex(input: &str) -> Result<Self> {
        let bytes = hex::decode(input)
            .map_err(|e| Error::InvalidInput(format!("invalid entry hash: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidInput("entry hash must be 32 bytes".to_string()))?;
        Ok(Self(bytes))
    }

    /// Byte-for-byte comparison in constant time
    pub fn verify(&self, other: &EntryHash) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl fmt::Display for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryHash({})", self.to_hex())
    }
}

/// Hash an entry's identifying fields
///
/// Covers `(subject, |amount|, sign(direction), timestamp)`. Each field is
/// length-prefixed so no two distinct tuples share an encoding.
pub fn hash_entry(
    subject: &AccountId,
    amount: Decimal,
    direction: Direction,
    timestamp: DateTime<Utc>,
) -> EntryHash {
    let amount = to_fixed2(amount.abs());
    let nanos = timestamp
        .timestamp_nanos_opt()
        .unwrap_or_else(|| timestamp.timestamp_micros().saturating_mul(1_000));

    let mut hasher = Sha256::new();
    update_field(&mut hasher, subject.as_str().as_bytes());
    update_field(&mut hasher, amount.as_bytes());
    update_field(&mut hasher, &[direction.sign_byte()]);
    hasher.update(nanos.to_be_bytes());

    EntryHash(hasher.finalize().into())
}

impl Serialize for EntryHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EntryHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        EntryHash::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

fn update_field(hasher: &mut Sha256, field: &[u8]) {
    hasher.update((field.len() as u64).to_be_bytes());
    hasher.update(field);
}
