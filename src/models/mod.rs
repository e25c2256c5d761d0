//! Data models representing ledger entities and API bodies.
//!
//! Entities refer to their owning account by id only (`account_id`); nothing holds a
//! reference to a parent record.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::LedgerError;

/// Ledger account model
pub mod account;
/// Balance-history (audit trail) model
pub mod history;
/// Typed identifiers
pub mod ids;
/// Currency and amount rules
pub mod money;
/// Accounting transaction model
pub mod transaction;
/// Usage aggregation model
pub mod usage;

/// Half-open UTC time range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, rejecting empty or inverted bounds.
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, LedgerError> {
        if from >= to {
            return Err(LedgerError::Validation(format!(
                "range start {from} must be before its end {to}"
            )));
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from <= instant && instant < self.to
    }
}
