//! PostgreSQL ledger store.
//!
//! # Locking
//!
//! A posting unit is a database transaction that starts with
//! `SELECT ... FROM accounts WHERE id = $1 FOR UPDATE`. The row lock is what serializes
//! postings per account; `SET LOCAL lock_timeout` bounds how long a unit waits for it, and
//! an expired wait surfaces as `StoreError::LockTimeout` (SQLSTATE `55P03`).
//!
//! # Atomicity
//!
//! The transaction insert, the history insert and the balance update run in the same
//! database transaction. Dropping a `PgPostingUnit` before commit rolls the transaction
//! back.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Postgres;

use super::{LedgerStore, PostingUnit, StoreError, StoreResult};
use crate::db::DbPool;
use crate::models::TimeRange;
use crate::models::account::{Account, AccountStatus};
use crate::models::history::AccountBalanceHistory;
use crate::models::ids::{AccountId, CustomerId, TransactionId};
use crate::models::money::Currency;
use crate::models::transaction::{AccountingTransaction, TransactionStatus};
use crate::models::usage::{UsageFilter, UsageTotals};

/// PostgreSQL implementation of [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: DbPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Unit = PgPostingUnit;

    async fn find_account_by_owner(
        &self,
        customer_id: CustomerId,
        currency: &Currency,
    ) -> StoreResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, customer_id, currency, balance, status, version, created_at, updated_at
            FROM accounts
            WHERE customer_id = $1 AND currency = $2
            "#,
        )
        .bind(customer_id)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn get_account(&self, account_id: AccountId) -> StoreResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, customer_id, currency, balance, status, version, created_at, updated_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn insert_account(&self, account: &Account) -> StoreResult<Account> {
        // UNIQUE (customer_id, currency) turns a lost creation race into UniqueViolation
        let created = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (id, customer_id, currency, balance, status, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, customer_id, currency, balance, status, version, created_at, updated_at
            "#,
        )
        .bind(account.id)
        .bind(account.customer_id)
        .bind(&account.currency)
        .bind(account.balance)
        .bind(account.status)
        .bind(account.version)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn find_transaction_by_key(
        &self,
        account_id: AccountId,
        idempotency_key: &str,
    ) -> StoreResult<Option<AccountingTransaction>> {
        let transaction = sqlx::query_as::<_, AccountingTransaction>(
            r#"
            SELECT id, account_id, direction, operation_type, amount, currency,
                   balance_before, balance_after, reference_id, idempotency_key,
                   correlation_id, status, created_at, booked_at
            FROM accounting_transactions
            WHERE account_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(account_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn get_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> StoreResult<Option<AccountingTransaction>> {
        let transaction = sqlx::query_as::<_, AccountingTransaction>(
            r#"
            SELECT id, account_id, direction, operation_type, amount, currency,
                   balance_before, balance_after, reference_id, idempotency_key,
                   correlation_id, status, created_at, booked_at
            FROM accounting_transactions
            WHERE id = $1
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn list_transactions(
        &self,
        account_id: AccountId,
    ) -> StoreResult<Vec<AccountingTransaction>> {
        let transactions = sqlx::query_as::<_, AccountingTransaction>(
            r#"
            SELECT t.id, t.account_id, t.direction, t.operation_type, t.amount, t.currency,
                   t.balance_before, t.balance_after, t.reference_id, t.idempotency_key,
                   t.correlation_id, t.status, t.created_at, t.booked_at
            FROM accounting_transactions t
            JOIN account_balance_history h ON h.transaction_id = t.id
            WHERE t.account_id = $1
            ORDER BY h.sequence ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    async fn begin_posting(&self, account_id: AccountId) -> StoreResult<Option<Self::Unit>> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters; the value is a plain integer
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        // Lock the account row for the lifetime of the unit
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, customer_id, currency, balance, status, version, created_at, updated_at
            FROM accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?;

        match account {
            Some(account) => Ok(Some(PgPostingUnit { tx, account })),
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }

    async fn list_history(
        &self,
        account_id: AccountId,
        range: Option<TimeRange>,
    ) -> StoreResult<Vec<AccountBalanceHistory>> {
        let rows = sqlx::query_as::<_, AccountBalanceHistory>(
            r#"
            SELECT id, account_id, transaction_id, sequence, direction, change_amount,
                   balance_before, balance_after, currency, operation_type, reference_id,
                   created_at
            FROM account_balance_history
            WHERE account_id = $1
              AND ($2::TIMESTAMPTZ IS NULL OR created_at >= $2)
              AND ($3::TIMESTAMPTZ IS NULL OR created_at < $3)
            ORDER BY created_at ASC, sequence ASC
            "#,
        )
        .bind(account_id)
        .bind(range.map(|r| r.from))
        .bind(range.map(|r| r.to))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn usage_totals(&self, filter: &UsageFilter) -> StoreResult<UsageTotals> {
        let totals = sqlx::query_as::<_, UsageTotals>(
            r#"
            SELECT COUNT(*) AS count, COALESCE(SUM(amount), 0)::NUMERIC(19, 2) AS amount
            FROM accounting_transactions
            WHERE account_id = $1
              AND status = $2
              AND created_at >= $3
              AND created_at < $4
              AND ($5::SMALLINT IS NULL OR direction = $5)
              AND ($6::SMALLINT IS NULL OR operation_type = $6)
            "#,
        )
        .bind(filter.account_id)
        .bind(TransactionStatus::Booked)
        .bind(filter.range.from)
        .bind(filter.range.to)
        .bind(filter.direction)
        .bind(filter.operation_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(totals)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Posting unit of the PostgreSQL store: an open transaction holding the account row lock.
pub struct PgPostingUnit {
    tx: sqlx::Transaction<'static, Postgres>,
    account: Account,
}

#[async_trait]
impl PostingUnit for PgPostingUnit {
    fn account(&self) -> &Account {
        &self.account
    }

    async fn find_transaction_by_key(
        &mut self,
        idempotency_key: &str,
    ) -> StoreResult<Option<AccountingTransaction>> {
        let transaction = sqlx::query_as::<_, AccountingTransaction>(
            r#"
            SELECT id, account_id, direction, operation_type, amount, currency,
                   balance_before, balance_after, reference_id, idempotency_key,
                   correlation_id, status, created_at, booked_at
            FROM accounting_transactions
            WHERE account_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(self.account.id)
        .bind(idempotency_key)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(transaction)
    }

    async fn commit_posting(
        mut self,
        transaction: &AccountingTransaction,
        history: &AccountBalanceHistory,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO accounting_transactions (
                id, account_id, direction, operation_type, amount, currency,
                balance_before, balance_after, reference_id, idempotency_key,
                correlation_id, status, created_at, booked_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.account_id)
        .bind(transaction.direction)
        .bind(transaction.operation_type)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(transaction.balance_before)
        .bind(transaction.balance_after)
        .bind(&transaction.reference_id)
        .bind(&transaction.idempotency_key)
        .bind(&transaction.correlation_id)
        .bind(transaction.status)
        .bind(transaction.created_at)
        .bind(transaction.booked_at)
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO account_balance_history (
                id, account_id, transaction_id, sequence, direction, change_amount,
                balance_before, balance_after, currency, operation_type, reference_id,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(history.id)
        .bind(history.account_id)
        .bind(history.transaction_id)
        .bind(history.sequence)
        .bind(history.direction)
        .bind(history.change_amount)
        .bind(history.balance_before)
        .bind(history.balance_after)
        .bind(&history.currency)
        .bind(history.operation_type)
        .bind(&history.reference_id)
        .bind(history.created_at)
        .execute(&mut *self.tx)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $1, version = $2, updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(transaction.balance_after)
        .bind(history.sequence)
        .bind(transaction.created_at)
        .bind(self.account.id)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if updated != 1 {
            // Dropping the transaction rolls back the inserts above
            return Err(StoreError::Unavailable(format!(
                "account {} disappeared while locked",
                self.account.id
            )));
        }

        self.tx.commit().await?;
        Ok(())
    }

    async fn commit_status(
        mut self,
        status: AccountStatus,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<Account> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET status = $1, updated_at = $2
            WHERE id = $3
            RETURNING id, customer_id, currency, balance, status, version, created_at, updated_at
            "#,
        )
        .bind(status)
        .bind(updated_at)
        .bind(self.account.id)
        .fetch_one(&mut *self.tx)
        .await?;

        self.tx.commit().await?;
        Ok(account)
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
