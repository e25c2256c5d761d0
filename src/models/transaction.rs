//! Transaction data models and API request types.
//!
//! This module defines:
//! - `AccountingTransaction`: an immutable booking against one account
//! - The `Direction`, `OperationType` and `TransactionStatus` enums
//! - `PostingRequest`: the engine-level posting command
//! - Request bodies for the transaction endpoints
//!
//! # Enum Persistence
//!
//! All enums are stored as `SMALLINT` with the explicit discriminants below. The numbers
//! are part of the storage contract and must never be reassigned.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::ids::{AccountId, CustomerId, TransactionId};
use crate::models::money::Currency;

/// Side of the account a posting hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum Direction {
    /// Decreases the balance.
    Debit = 1,
    /// Increases the balance.
    Credit = 2,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Debit => Direction::Credit,
            Direction::Credit => Direction::Debit,
        }
    }

    /// Apply a positive `amount` to `balance` in this direction.
    ///
    /// Returns `None` on arithmetic overflow.
    pub fn apply(self, balance: Decimal, amount: Decimal) -> Option<Decimal> {
        match self {
            Direction::Credit => balance.checked_add(amount),
            Direction::Debit => balance.checked_sub(amount),
        }
    }
}

/// Business reason for a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum OperationType {
    TopUp = 1,
    TransferOut = 2,
    TransferIn = 3,
    Fee = 4,
    Adjustment = 5,
}

/// Lifecycle state of a transaction row.
///
/// The poster only ever writes `Booked` rows. The other states exist for rows written by
/// collaborators sharing the table and are excluded from usage figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TransactionStatus {
    Pending = 1,
    Booked = 2,
    Reversed = 3,
    Failed = 4,
}

/// Represents a transaction record from the database.
///
/// # Database Table
///
/// Maps to the `accounting_transactions` table. Rows are insert-only. The pair
/// `(account_id, idempotency_key)` is unique, which is what makes a retried posting
/// return the original row instead of booking twice.
///
/// # Balance Rule
///
/// `balance_after = balance_before + amount` for credits and
/// `balance_after = balance_before - amount` for debits.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct AccountingTransaction {
    pub id: TransactionId,

    /// Owning account
    pub account_id: AccountId,

    pub direction: Direction,

    pub operation_type: OperationType,

    /// Always positive; the sign comes from `direction`
    pub amount: Decimal,

    /// Same as the owning account's currency
    pub currency: Currency,

    pub balance_before: Decimal,

    pub balance_after: Decimal,

    /// Caller's business reference (e.g. a transfer id)
    pub reference_id: String,

    /// Unique per account
    pub idempotency_key: String,

    /// Cross-service trace id, opaque to the ledger
    pub correlation_id: Option<String>,

    pub status: TransactionStatus,

    pub created_at: DateTime<Utc>,

    pub booked_at: Option<DateTime<Utc>>,
}

impl AccountingTransaction {
    /// Signed effect of this transaction on the account balance.
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }
}

/// Engine-level command to post one transaction against an account.
#[derive(Debug, Clone)]
pub struct PostingRequest {
    pub direction: Direction,
    pub operation_type: OperationType,
    pub amount: Decimal,
    pub reference_id: String,
    pub idempotency_key: String,
    pub correlation_id: Option<String>,

    /// Currency the caller believes the account holds.
    ///
    /// When present it must match the account, otherwise the posting is rejected.
    pub currency: Option<Currency>,
}

/// Request to post a transaction for a customer's currency account.
///
/// # JSON Example
///
/// ```json
/// {
///   "customer_id": "550e8400-e29b-41d4-a716-446655440000",
///   "currency": "TRY",
///   "direction": "credit",
///   "operation_type": "top_up",
///   "amount": "100.00",
///   "reference_id": "tx1",
///   "idempotency_key": "K1",
///   "correlation_id": "wf-42"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct PostTransactionRequest {
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub direction: Direction,
    pub operation_type: OperationType,
    pub amount: Decimal,
    #[serde(default)]
    pub reference_id: String,
    pub idempotency_key: String,
    pub correlation_id: Option<String>,
}

impl PostTransactionRequest {
    /// Split into the owning pair and the engine command.
    pub fn into_parts(self) -> (CustomerId, Currency, PostingRequest) {
        let request = PostingRequest {
            direction: self.direction,
            operation_type: self.operation_type,
            amount: self.amount,
            reference_id: self.reference_id,
            idempotency_key: self.idempotency_key,
            correlation_id: self.correlation_id,
            currency: Some(self.currency.clone()),
        };
        (self.customer_id, self.currency, request)
    }
}

/// Request to compensate a booked transaction.
#[derive(Debug, Default, Deserialize)]
pub struct ReverseTransactionRequest {
    pub correlation_id: Option<String>,
}
