//! Account store operations: resolve-or-create, balance lookups, status changes.

use tracing::instrument;

use super::LedgerService;
use crate::error::{LedgerError, LedgerResult};
use crate::models::account::{Account, AccountStatus};
use crate::models::ids::{AccountId, CustomerId};
use crate::models::money::Currency;
use crate::store::{LedgerStore, PostingUnit, StoreError};

impl<S: LedgerStore> LedgerService<S> {
    /// Return the account for `(customer_id, currency)`, creating an empty active one if
    /// none exists.
    ///
    /// # Concurrency
    ///
    /// Two callers racing to create the same pair both insert; the unique constraint lets
    /// exactly one win and the loser re-reads the winner's row.
    #[instrument(skip_all, fields(customer_id = %customer_id, currency = %currency))]
    pub async fn ensure_account(
        &self,
        customer_id: CustomerId,
        currency: &Currency,
    ) -> LedgerResult<Account> {
        let attempts = self.settings.max_retries.max(1);

        for attempt in 1..=attempts {
            if let Some(existing) = self
                .store
                .find_account_by_owner(customer_id, currency)
                .await?
            {
                return Ok(existing);
            }

            let account = Account::open(customer_id, currency.clone(), self.clock.now());
            match self.store.insert_account(&account).await {
                Ok(created) => {
                    tracing::info!(account_id = %created.id, "account opened");
                    return Ok(created);
                }
                Err(StoreError::UniqueViolation(_)) => {
                    tracing::debug!(attempt, "lost account creation race, re-reading winner");
                    if let Some(winner) = self
                        .store
                        .find_account_by_owner(customer_id, currency)
                        .await?
                    {
                        return Ok(winner);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(LedgerError::ConcurrencyConflict { attempts })
    }

    pub async fn get_account(&self, account_id: AccountId) -> LedgerResult<Account> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound)
    }

    /// Current account (and therefore balance) for a customer's currency.
    ///
    /// Fails with `AccountNotFound` when the customer has no account in that currency.
    pub async fn get_balance(
        &self,
        customer_id: CustomerId,
        currency: &Currency,
    ) -> LedgerResult<Account> {
        self.store
            .find_account_by_owner(customer_id, currency)
            .await?
            .ok_or(LedgerError::AccountNotFound)
    }

    /// Move an account between `Active` and `Blocked`, or close it.
    ///
    /// Closing is terminal and only allowed at a zero balance. The change is made under
    /// the account lock so it cannot interleave with a posting.
    #[instrument(skip_all, fields(account_id = %account_id, status = %status))]
    pub async fn update_account_status(
        &self,
        account_id: AccountId,
        status: AccountStatus,
    ) -> LedgerResult<Account> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.change_status(account_id, status).await {
                Err(LedgerError::ConcurrencyConflict { .. }) if attempt < self.settings.max_retries => {
                    tracing::warn!(attempt, "account busy, retrying status change");
                    self.backoff(attempt).await;
                }
                Err(LedgerError::ConcurrencyConflict { .. }) => {
                    return Err(LedgerError::ConcurrencyConflict { attempts: attempt });
                }
                other => return other,
            }
        }
    }

    async fn change_status(
        &self,
        account_id: AccountId,
        status: AccountStatus,
    ) -> LedgerResult<Account> {
        let unit = self
            .store
            .begin_posting(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;
        let current = unit.account().clone();

        if current.status == status {
            unit.rollback().await?;
            return Ok(current);
        }

        if current.status == AccountStatus::Closed {
            unit.rollback().await?;
            return Err(LedgerError::Validation(
                "closed accounts cannot be reopened".to_string(),
            ));
        }

        if status == AccountStatus::Closed && !current.balance.is_zero() {
            unit.rollback().await?;
            return Err(LedgerError::Validation(format!(
                "account balance must be zero to close, is {}",
                current.balance
            )));
        }

        let updated = unit.commit_status(status, self.clock.now()).await?;
        tracing::info!(from = %current.status, "account status changed");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use super::*;
    use crate::clock::SystemClock;
    use crate::models::transaction::{Direction, OperationType, PostingRequest};
    use crate::services::LedgerSettings;
    use crate::store::MemoryStore;

    fn ledger() -> LedgerService<MemoryStore> {
        LedgerService::new(
            MemoryStore::default(),
            LedgerSettings::default(),
            Arc::new(SystemClock),
        )
    }

    fn try_() -> Currency {
        Currency::new("TRY").unwrap()
    }

    #[tokio::test]
    async fn ensure_account_creates_once_and_then_resolves() {
        let ledger = ledger();
        let customer = CustomerId::new();

        let first = ledger.ensure_account(customer, &try_()).await.unwrap();
        let second = ledger.ensure_account(customer, &try_()).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.balance.to_string(), "0.00");
        assert_eq!(first.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn each_currency_gets_its_own_account() {
        let ledger = ledger();
        let customer = CustomerId::new();

        let lira = ledger.ensure_account(customer, &try_()).await.unwrap();
        let euro = ledger
            .ensure_account(customer, &Currency::new("EUR").unwrap())
            .await
            .unwrap();

        assert_ne!(lira.id, euro.id);
    }

    #[tokio::test]
    async fn balance_of_unknown_pair_is_not_found() {
        let err = ledger()
            .get_balance(CustomerId::new(), &try_())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound));
    }

    #[tokio::test]
    async fn blocked_account_can_be_reactivated() {
        let ledger = ledger();
        let account = ledger.ensure_account(CustomerId::new(), &try_()).await.unwrap();

        let blocked = ledger
            .update_account_status(account.id, AccountStatus::Blocked)
            .await
            .unwrap();
        assert_eq!(blocked.status, AccountStatus::Blocked);

        let active = ledger
            .update_account_status(account.id, AccountStatus::Active)
            .await
            .unwrap();
        assert_eq!(active.status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn closed_account_stays_closed() {
        let ledger = ledger();
        let account = ledger.ensure_account(CustomerId::new(), &try_()).await.unwrap();

        ledger
            .update_account_status(account.id, AccountStatus::Closed)
            .await
            .unwrap();
        let err = ledger
            .update_account_status(account.id, AccountStatus::Active)
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn account_with_funds_cannot_close() {
        let ledger = ledger();
        let account = ledger.ensure_account(CustomerId::new(), &try_()).await.unwrap();
        ledger
            .post_transaction(
                account.id,
                PostingRequest {
                    direction: Direction::Credit,
                    operation_type: OperationType::TopUp,
                    amount: Decimal::ONE,
                    reference_id: "r".into(),
                    idempotency_key: "k".into(),
                    correlation_id: None,
                    currency: None,
                },
            )
            .await
            .unwrap();

        let err = ledger
            .update_account_status(account.id, AccountStatus::Closed)
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(
            ledger.get_account(account.id).await.unwrap().status,
            AccountStatus::Active
        );
    }

    #[tokio::test]
    async fn status_change_on_unknown_account_is_not_found() {
        let err = ledger()
            .update_account_status(AccountId::new(), AccountStatus::Blocked)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound));
    }
}
