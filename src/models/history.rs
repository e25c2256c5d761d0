//! Balance-history rows: the per-account audit trail.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::ids::{AccountId, HistoryId, TransactionId};
use crate::models::money::Currency;
use crate::models::transaction::{AccountingTransaction, Direction, OperationType};

/// One balance change, written in the same storage transaction as the booking it records.
///
/// # Database Table
///
/// Maps to the `account_balance_history` table (insert-only). For any account the rows
/// form a single chain: `sequence` counts 1, 2, 3, ... without gaps, and each row's
/// `balance_before` equals the previous row's `balance_after`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct AccountBalanceHistory {
    pub id: HistoryId,
    pub account_id: AccountId,
    pub transaction_id: TransactionId,
    pub sequence: i64,
    pub direction: Direction,
    pub change_amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub currency: Currency,
    pub operation_type: OperationType,
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
}

impl AccountBalanceHistory {
    /// Build the history row for a transaction about to be booked at `sequence`.
    pub fn record(transaction: &AccountingTransaction, sequence: i64) -> Self {
        Self {
            id: HistoryId::new(),
            account_id: transaction.account_id,
            transaction_id: transaction.id,
            sequence,
            direction: transaction.direction,
            change_amount: transaction.amount,
            balance_before: transaction.balance_before,
            balance_after: transaction.balance_after,
            currency: transaction.currency.clone(),
            operation_type: transaction.operation_type,
            reference_id: transaction.reference_id.clone(),
            created_at: transaction.created_at,
        }
    }
}

/// Query string for the history endpoint. Both bounds or neither.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}
