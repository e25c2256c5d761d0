//! Storage boundary of the ledger.
//!
//! The engine never talks to a database directly. It is constructed with a [`LedgerStore`]
//! and does all reads and writes through it:
//!
//! - [`PgStore`]: PostgreSQL, used by the server binary
//! - [`MemoryStore`]: in-process, used by tests and local experiments
//!
//! # Posting Units
//!
//! Every balance change runs inside a [`PostingUnit`] obtained from
//! [`LedgerStore::begin_posting`]. A unit is one storage transaction that holds the
//! account's exclusive lock until it is committed, rolled back, or dropped. Nothing staged
//! in a unit is visible to other callers before `commit_*` returns, and dropping a unit
//! discards everything, which is what makes cancellation before the commit point safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::TimeRange;
use crate::models::account::{Account, AccountStatus};
use crate::models::history::AccountBalanceHistory;
use crate::models::ids::{AccountId, CustomerId, TransactionId};
use crate::models::money::Currency;
use crate::models::transaction::AccountingTransaction;
use crate::models::usage::{UsageFilter, UsageTotals};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage operation error.
///
/// These are infrastructure errors, as opposed to ledger rule violations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(sqlx::Error),

    /// A unique constraint rejected the write: the (customer, currency) pair or the
    /// (account, idempotency key) pair already exists.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The account lock was not granted within the configured wait.
    #[error("timed out waiting for the account lock")]
    LockTimeout,

    /// The database aborted the transaction (serialization failure or deadlock).
    #[error("transaction aborted by the database: {0}")]
    SerializationFailure(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the error comes from competing access to the same account, in which case
    /// the operation can be retried as is.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout | StoreError::SerializationFailure(_)
        )
    }
}

/// Classify sqlx errors by PostgreSQL error code.
///
/// | Code | StoreError |
/// |------|------------|
/// | `23505` unique_violation | `UniqueViolation` |
/// | `55P03` lock_not_available | `LockTimeout` |
/// | `40001` serialization_failure, `40P01` deadlock_detected | `SerializationFailure` |
/// | pool timed out / closed | `Unavailable` |
/// | anything else | `Database` |
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some("23505") => return StoreError::UniqueViolation(db_err.message().to_string()),
                Some("55P03") => return StoreError::LockTimeout,
                Some("40001") | Some("40P01") => {
                    return StoreError::SerializationFailure(db_err.message().to_string());
                }
                _ => {}
            }
        }

        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for accounts, transactions and balance history.
///
/// Implementations must:
/// - keep (customer_id, currency) unique across accounts
/// - keep (account_id, idempotency_key) unique across transactions
/// - never update or delete transaction and history rows
/// - serialize posting units per account while letting different accounts proceed in
///   parallel
/// - bound the wait for an account lock and report `LockTimeout` when it expires
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Unit: PostingUnit;

    async fn find_account_by_owner(
        &self,
        customer_id: CustomerId,
        currency: &Currency,
    ) -> StoreResult<Option<Account>>;

    async fn get_account(&self, account_id: AccountId) -> StoreResult<Option<Account>>;

    /// Insert a new account. Fails with `UniqueViolation` when the pair already exists.
    async fn insert_account(&self, account: &Account) -> StoreResult<Account>;

    async fn find_transaction_by_key(
        &self,
        account_id: AccountId,
        idempotency_key: &str,
    ) -> StoreResult<Option<AccountingTransaction>>;

    async fn get_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> StoreResult<Option<AccountingTransaction>>;

    /// All transactions of an account, oldest first.
    async fn list_transactions(
        &self,
        account_id: AccountId,
    ) -> StoreResult<Vec<AccountingTransaction>>;

    /// Open a storage transaction holding the account's exclusive lock.
    ///
    /// Returns `None` when the account does not exist.
    async fn begin_posting(&self, account_id: AccountId) -> StoreResult<Option<Self::Unit>>;

    /// History rows of an account ordered by `created_at`, then `sequence`; restricted to
    /// `[from, to)` when a range is given.
    async fn list_history(
        &self,
        account_id: AccountId,
        range: Option<TimeRange>,
    ) -> StoreResult<Vec<AccountBalanceHistory>>;

    /// Count and unsigned sum of **booked** transactions matching the filter.
    async fn usage_totals(&self, filter: &UsageFilter) -> StoreResult<UsageTotals>;

    /// Cheap round trip used by the health check.
    async fn ping(&self) -> StoreResult<()>;
}

/// One storage transaction holding an account's exclusive lock.
#[async_trait]
pub trait PostingUnit: Send {
    /// The account as read under the lock.
    fn account(&self) -> &Account;

    /// Idempotency lookup performed under the lock.
    async fn find_transaction_by_key(
        &mut self,
        idempotency_key: &str,
    ) -> StoreResult<Option<AccountingTransaction>>;

    /// Insert the transaction and its history row, move the account balance to
    /// `transaction.balance_after` and its version to `history.sequence`, then commit.
    /// All or nothing.
    async fn commit_posting(
        self,
        transaction: &AccountingTransaction,
        history: &AccountBalanceHistory,
    ) -> StoreResult<()>;

    /// Change the account status and commit.
    async fn commit_status(
        self,
        status: AccountStatus,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Account>;

    /// Release the lock without writing anything.
    async fn rollback(self) -> StoreResult<()>;
}
