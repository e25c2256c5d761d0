//! Account data models and API request/response types.
//!
//! This module defines:
//! - `Account`: the ledger account entity, one per (customer, currency) pair
//! - `AccountStatus`: lifecycle state controlling whether postings are accepted
//! - Request/response bodies for the account endpoints

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::ids::{AccountId, CustomerId};
use crate::models::money::{self, Currency};

/// Lifecycle state of an account.
///
/// Persisted as `SMALLINT`: Active=1, Blocked=2, Closed=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum AccountStatus {
    /// Accepts postings.
    Active = 1,
    /// Temporarily frozen; can be reactivated.
    Blocked = 2,
    /// Terminal. Never reopened.
    Closed = 3,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AccountStatus::Active => "active",
            AccountStatus::Blocked => "blocked",
            AccountStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Represents an account record from the database.
///
/// # Database Table
///
/// Maps to the `accounts` table. Each account:
/// - Belongs to exactly one customer and holds exactly one currency; the pair is unique
/// - Has a balance stored as `NUMERIC(19, 2)` that never goes below zero
/// - Carries a `version` equal to the number of postings booked against it
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct Account {
    pub id: AccountId,

    pub customer_id: CustomerId,

    pub currency: Currency,

    /// Current balance at ledger scale.
    ///
    /// Always equals the `balance_after` of the latest history row (or zero when there is
    /// no history yet).
    pub balance: Decimal,

    pub status: AccountStatus,

    /// Number of booked postings; the next history row gets `version + 1`.
    pub version: i64,

    pub created_at: DateTime<Utc>,

    /// Timestamp of the last balance or status change
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Build a fresh, empty, active account for a customer/currency pair.
    pub fn open(customer_id: CustomerId, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::new(),
            customer_id,
            currency,
            balance: money::zero(),
            status: AccountStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// Request body for creating (or resolving) an account.
///
/// # JSON Example
///
/// ```json
/// {
///   "customer_id": "550e8400-e29b-41d4-a716-446655440000",
///   "currency": "TRY"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub customer_id: CustomerId,
    pub currency: Currency,
}

/// Request body for changing an account's status.
#[derive(Debug, Deserialize)]
pub struct UpdateAccountStatusRequest {
    pub status: AccountStatus,
}

/// Response body for account endpoints.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "7a1f...",
///   "customer_id": "550e8400-e29b-41d4-a716-446655440000",
///   "currency": "TRY",
///   "balance": "0.00",
///   "status": "active",
///   "created_at": "2025-12-20T10:00:00Z",
///   "updated_at": "2025-12-20T10:00:00Z"
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: AccountId,
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub balance: Decimal,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Drops the internal `version` counter.
impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            customer_id: account.customer_id,
            currency: account.currency,
            balance: account.balance,
            status: account.status,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// Response body for the balance lookup.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub account_id: AccountId,
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub balance: Decimal,
}

impl From<Account> for BalanceResponse {
    fn from(account: Account) -> Self {
        Self {
            account_id: account.id,
            customer_id: account.customer_id,
            currency: account.currency,
            balance: account.balance,
        }
    }
}
