//! In-memory ledger store.
//!
//! Intended for tests and local development. Each account has a `tokio::sync::Mutex` that
//! plays the role of the row lock: a posting unit owns the guard, so postings on one
//! account are serialized while other accounts proceed in parallel.
//!
//! Committed state sits apart from the row lock, behind a `std::sync::RwLock` that only a
//! unit holding the row lock writes to. Reads go straight to that committed state, so like
//! MVCC reads in Postgres they never wait on an open posting. No `std` lock is held across
//! an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LedgerStore, PostingUnit, StoreError, StoreResult};
use crate::models::TimeRange;
use crate::models::account::{Account, AccountStatus};
use crate::models::history::AccountBalanceHistory;
use crate::models::ids::{AccountId, CustomerId, TransactionId};
use crate::models::money::{self, Currency};
use crate::models::transaction::{AccountingTransaction, TransactionStatus};
use crate::models::usage::{UsageFilter, UsageTotals};

/// Lock wait used by [`MemoryStore::default`].
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Committed state of one account.
#[derive(Debug)]
struct AccountBook {
    account: Account,
    transactions: Vec<AccountingTransaction>,
    /// idempotency key -> index into `transactions`
    keys: HashMap<String, usize>,
    history: Vec<AccountBalanceHistory>,
}

/// Row lock and committed state of one account.
#[derive(Debug, Clone)]
struct BookHandle {
    lock: Arc<Mutex<()>>,
    committed: Arc<RwLock<AccountBook>>,
}

#[derive(Debug, Default)]
struct Tables {
    books: HashMap<AccountId, BookHandle>,
    owners: HashMap<(CustomerId, Currency), AccountId>,
    transactions: HashMap<TransactionId, AccountId>,
}

/// In-memory implementation of [`LedgerStore`].
///
/// Cloning is cheap and clones share the same tables.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("in-memory tables lock poisoned".to_string())
}

fn read_book(committed: &RwLock<AccountBook>) -> StoreResult<RwLockReadGuard<'_, AccountBook>> {
    committed.read().map_err(|_| poisoned())
}

fn write_book(committed: &RwLock<AccountBook>) -> StoreResult<RwLockWriteGuard<'_, AccountBook>> {
    committed.write().map_err(|_| poisoned())
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            lock_timeout,
        }
    }

    fn read_tables(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| poisoned())
    }

    fn handle(&self, account_id: AccountId) -> StoreResult<Option<BookHandle>> {
        Ok(self.read_tables()?.books.get(&account_id).cloned())
    }

    fn owner(&self, customer_id: CustomerId, currency: &Currency) -> StoreResult<Option<AccountId>> {
        Ok(self
            .read_tables()?
            .owners
            .get(&(customer_id, currency.clone()))
            .copied())
    }

    fn transaction_owner(&self, transaction_id: TransactionId) -> StoreResult<Option<AccountId>> {
        Ok(self
            .read_tables()?
            .transactions
            .get(&transaction_id)
            .copied())
    }

    /// Run `read` against the committed book of an account, or return `None` when the
    /// account does not exist.
    fn with_book<T>(
        &self,
        account_id: AccountId,
        read: impl FnOnce(&AccountBook) -> T,
    ) -> StoreResult<Option<T>> {
        let Some(handle) = self.handle(account_id)? else {
            return Ok(None);
        };
        let book = read_book(&handle.committed)?;
        Ok(Some(read(&book)))
    }

    async fn lock(&self, lock: Arc<Mutex<()>>) -> StoreResult<OwnedMutexGuard<()>> {
        tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Unit = MemoryPostingUnit;

    async fn find_account_by_owner(
        &self,
        customer_id: CustomerId,
        currency: &Currency,
    ) -> StoreResult<Option<Account>> {
        match self.owner(customer_id, currency)? {
            Some(account_id) => self.get_account(account_id).await,
            None => Ok(None),
        }
    }

    async fn get_account(&self, account_id: AccountId) -> StoreResult<Option<Account>> {
        self.with_book(account_id, |book| book.account.clone())
    }

    async fn insert_account(&self, account: &Account) -> StoreResult<Account> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;

        let owner = (account.customer_id, account.currency.clone());
        if tables.owners.contains_key(&owner) {
            return Err(StoreError::UniqueViolation(format!(
                "account for customer {} in {} already exists",
                account.customer_id, account.currency
            )));
        }
        if tables.books.contains_key(&account.id) {
            return Err(StoreError::UniqueViolation(format!(
                "account {} already exists",
                account.id
            )));
        }

        tables.owners.insert(owner, account.id);
        tables.books.insert(
            account.id,
            BookHandle {
                lock: Arc::new(Mutex::new(())),
                committed: Arc::new(RwLock::new(AccountBook {
                    account: account.clone(),
                    transactions: Vec::new(),
                    keys: HashMap::new(),
                    history: Vec::new(),
                })),
            },
        );

        Ok(account.clone())
    }

    async fn find_transaction_by_key(
        &self,
        account_id: AccountId,
        idempotency_key: &str,
    ) -> StoreResult<Option<AccountingTransaction>> {
        Ok(self
            .with_book(account_id, |book| {
                book.keys
                    .get(idempotency_key)
                    .map(|&idx| book.transactions[idx].clone())
            })?
            .flatten())
    }

    async fn get_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> StoreResult<Option<AccountingTransaction>> {
        let Some(account_id) = self.transaction_owner(transaction_id)? else {
            return Ok(None);
        };

        Ok(self
            .with_book(account_id, |book| {
                book.transactions
                    .iter()
                    .find(|t| t.id == transaction_id)
                    .cloned()
            })?
            .flatten())
    }

    async fn list_transactions(
        &self,
        account_id: AccountId,
    ) -> StoreResult<Vec<AccountingTransaction>> {
        Ok(self
            .with_book(account_id, |book| book.transactions.clone())?
            .unwrap_or_default())
    }

    async fn begin_posting(&self, account_id: AccountId) -> StoreResult<Option<Self::Unit>> {
        let Some(handle) = self.handle(account_id)? else {
            return Ok(None);
        };

        let guard = self.lock(Arc::clone(&handle.lock)).await?;
        let account = read_book(&handle.committed)?.account.clone();

        Ok(Some(MemoryPostingUnit {
            _guard: guard,
            account,
            committed: handle.committed,
            tables: Arc::clone(&self.tables),
        }))
    }

    async fn list_history(
        &self,
        account_id: AccountId,
        range: Option<TimeRange>,
    ) -> StoreResult<Vec<AccountBalanceHistory>> {
        let mut rows = self
            .with_book(account_id, |book| {
                book.history
                    .iter()
                    .filter(|row| range.is_none_or(|r| r.contains(row.created_at)))
                    .cloned()
                    .collect::<Vec<_>>()
            })?
            .unwrap_or_default();
        rows.sort_by_key(|row| (row.created_at, row.sequence));

        Ok(rows)
    }

    async fn usage_totals(&self, filter: &UsageFilter) -> StoreResult<UsageTotals> {
        let totals = self.with_book(filter.account_id, |book| {
            let mut totals = UsageTotals {
                count: 0,
                amount: money::zero(),
            };
            for t in book.transactions.iter().filter(|t| {
                t.status == TransactionStatus::Booked
                    && filter.range.contains(t.created_at)
                    && filter.direction.is_none_or(|d| d == t.direction)
                    && filter.operation_type.is_none_or(|op| op == t.operation_type)
            }) {
                totals.count += 1;
                totals.amount += t.amount;
            }
            totals
        })?;

        Ok(totals.unwrap_or(UsageTotals {
            count: 0,
            amount: money::zero(),
        }))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.read_tables().map(|_| ())
    }
}

/// Posting unit of the in-memory store: owns the account's row lock.
///
/// Writes are applied only inside `commit_*`, synchronously, so a unit dropped at any
/// earlier point leaves the committed book untouched.
#[derive(Debug)]
pub struct MemoryPostingUnit {
    _guard: OwnedMutexGuard<()>,
    /// The account as committed when the lock was taken.
    account: Account,
    committed: Arc<RwLock<AccountBook>>,
    tables: Arc<RwLock<Tables>>,
}

#[async_trait]
impl PostingUnit for MemoryPostingUnit {
    fn account(&self) -> &Account {
        &self.account
    }

    async fn find_transaction_by_key(
        &mut self,
        idempotency_key: &str,
    ) -> StoreResult<Option<AccountingTransaction>> {
        let book = read_book(&self.committed)?;
        Ok(book
            .keys
            .get(idempotency_key)
            .map(|&idx| book.transactions[idx].clone()))
    }

    async fn commit_posting(
        self,
        transaction: &AccountingTransaction,
        history: &AccountBalanceHistory,
    ) -> StoreResult<()> {
        // Lock order: tables, then book. Readers never hold both.
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let mut book = write_book(&self.committed)?;

        if book.keys.contains_key(&transaction.idempotency_key) {
            return Err(StoreError::UniqueViolation(format!(
                "idempotency key '{}' already used on account {}",
                transaction.idempotency_key, transaction.account_id
            )));
        }

        tables
            .transactions
            .insert(transaction.id, transaction.account_id);

        let next = book.transactions.len();
        book.keys.insert(transaction.idempotency_key.clone(), next);
        book.transactions.push(transaction.clone());
        book.history.push(history.clone());
        book.account.balance = transaction.balance_after;
        book.account.version = history.sequence;
        book.account.updated_at = transaction.created_at;

        Ok(())
    }

    async fn commit_status(
        self,
        status: AccountStatus,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Account> {
        let mut book = write_book(&self.committed)?;
        book.account.status = status;
        book.account.updated_at = updated_at;
        Ok(book.account.clone())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}
