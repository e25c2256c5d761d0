//! Transaction poster - the only writer of balances.
//!
//! This service handles:
//! - Input validation (amount scale, key and reference limits, currency match)
//! - Idempotency: a known `(account, idempotency_key)` returns the booked row
//! - Atomic booking: transaction row, history row and balance move together
//! - Bounded retries when the account is contended
//! - Reversals as compensating postings
//!
//! # Posting Protocol
//!
//! 1. Validate the request and resolve the account
//! 2. Return the existing row if the key is known (lock-free fast path)
//! 3. Open a posting unit, which takes the account lock
//! 4. Re-check the key and the account status under the lock
//! 5. Compute `balance_after`; a debit below zero is rejected with nothing written
//! 6. Commit transaction, history and balance in one storage transaction
//!
//! Steps 3 to 5 run under `posting_timeout`. The commit itself is never cut short: once it
//! starts, the caller either gets the booked row or a storage error.

use rust_decimal::Decimal;
use tracing::instrument;

use super::LedgerService;
use crate::error::{LedgerError, LedgerResult};
use crate::models::account::Account;
use crate::models::history::AccountBalanceHistory;
use crate::models::ids::{AccountId, CustomerId, TransactionId};
use crate::models::money::{self, Currency};
use crate::models::transaction::{
    AccountingTransaction, OperationType, PostingRequest, TransactionStatus,
};
use crate::store::{LedgerStore, PostingUnit, StoreError};

/// Longest accepted idempotency key, reference or correlation id.
pub const MAX_TOKEN_LEN: usize = 128;

/// Outcome of the locked phase of one attempt.
enum Prepared<U> {
    /// The key was booked by a concurrent caller while we waited for the lock.
    Replay(AccountingTransaction),
    Ready {
        unit: U,
        transaction: AccountingTransaction,
        history: AccountBalanceHistory,
    },
}

/// Release the unit, then fail with `err`.
async fn reject<U: PostingUnit, T>(unit: U, err: LedgerError) -> LedgerResult<T> {
    unit.rollback().await?;
    Err(err)
}

fn check_token(field: &str, value: &str) -> LedgerResult<()> {
    if value.chars().count() > MAX_TOKEN_LEN {
        return Err(LedgerError::Validation(format!(
            "{field} must be at most {MAX_TOKEN_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate everything about a posting that does not need the account.
///
/// Returns the amount at ledger scale.
fn validate_posting(request: &PostingRequest) -> LedgerResult<Decimal> {
    let amount = money::ledger_amount(request.amount)?;

    if request.idempotency_key.trim().is_empty() {
        return Err(LedgerError::Validation(
            "idempotency_key must not be empty".to_string(),
        ));
    }
    check_token("idempotency_key", &request.idempotency_key)?;
    check_token("reference_id", &request.reference_id)?;
    if let Some(correlation_id) = &request.correlation_id {
        check_token("correlation_id", correlation_id)?;
    }

    Ok(amount)
}

/// Prefix of the idempotency keys the ledger books reversals under.
pub const REVERSAL_KEY_PREFIX: &str = "reversal:";

/// Idempotency key reserved for the reversal of `transaction_id`.
pub fn reversal_key(transaction_id: TransactionId) -> String {
    format!("{REVERSAL_KEY_PREFIX}{transaction_id}")
}

/// Validation for requests coming from callers, who may not use reserved keys.
fn validate_client_posting(request: &PostingRequest) -> LedgerResult<Decimal> {
    if request.idempotency_key.starts_with(REVERSAL_KEY_PREFIX) {
        return Err(LedgerError::Validation(format!(
            "idempotency keys starting with '{REVERSAL_KEY_PREFIX}' are reserved"
        )));
    }
    validate_posting(request)
}

/// Whether `transaction` is the compensation the ledger booked for another row.
fn is_reversal(transaction: &AccountingTransaction) -> bool {
    transaction.operation_type == OperationType::Adjustment
        && transaction
            .reference_id
            .parse::<TransactionId>()
            .is_ok_and(|original| transaction.idempotency_key == reversal_key(original))
}

impl<S: LedgerStore> LedgerService<S> {
    /// Post one transaction against an account.
    ///
    /// # Returns
    ///
    /// The booked transaction. Replaying a known idempotency key returns the originally
    /// booked row and changes nothing.
    ///
    /// # Errors
    ///
    /// - `Validation`: bad amount, empty or oversized key, currency mismatch, balance overflow
    /// - `AccountNotFound`: no such account
    /// - `AccountNotAvailable`: account is blocked or closed
    /// - `InsufficientFunds`: a debit would make the balance negative
    /// - `ConcurrencyConflict`: the account stayed contended for every attempt
    /// - `StorageFault`: storage failed; retry with the same key
    #[instrument(
        skip_all,
        fields(
            account_id = %account_id,
            direction = ?request.direction,
            amount = %request.amount,
            idempotency_key = %request.idempotency_key
        )
    )]
    pub async fn post_transaction(
        &self,
        account_id: AccountId,
        request: PostingRequest,
    ) -> LedgerResult<AccountingTransaction> {
        let amount = validate_client_posting(&request)?;
        self.book_posting(account_id, request, amount).await
    }

    /// Posting protocol for a request whose amount and tokens are already validated.
    async fn book_posting(
        &self,
        account_id: AccountId,
        request: PostingRequest,
        amount: Decimal,
    ) -> LedgerResult<AccountingTransaction> {
        let account = self.get_account(account_id).await?;

        if let Some(expected) = &request.currency {
            if expected != &account.currency {
                return Err(LedgerError::Validation(format!(
                    "currency {expected} does not match account currency {}",
                    account.currency
                )));
            }
        }

        if let Some(existing) = self
            .store
            .find_transaction_by_key(account_id, &request.idempotency_key)
            .await?
        {
            tracing::info!(transaction_id = %existing.id, "idempotent replay");
            return Ok(existing);
        }

        if !account.is_active() {
            return Err(LedgerError::AccountNotAvailable(account.status));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt_posting(&account, &request, amount).await {
                Err(LedgerError::ConcurrencyConflict { .. })
                    if attempt < self.settings.max_retries =>
                {
                    tracing::warn!(attempt, "account contended, retrying posting");
                    self.backoff(attempt).await;
                }
                Err(LedgerError::ConcurrencyConflict { .. }) => {
                    tracing::warn!(attempts = attempt, "giving up on contended account");
                    return Err(LedgerError::ConcurrencyConflict { attempts: attempt });
                }
                other => return other,
            }
        }
    }

    /// One attempt: the locked phase under the deadline, then the commit without it.
    async fn attempt_posting(
        &self,
        account: &Account,
        request: &PostingRequest,
        amount: Decimal,
    ) -> LedgerResult<AccountingTransaction> {
        // Dropping the prepare future on expiry drops the unit, which rolls back
        let prepared = tokio::time::timeout(
            self.settings.posting_timeout,
            self.prepare_posting(account.id, request, amount),
        )
        .await
        .map_err(|_| {
            tracing::warn!("posting deadline expired before commit");
            LedgerError::ConcurrencyConflict { attempts: 1 }
        })??;

        let (unit, transaction, history) = match prepared {
            Prepared::Replay(existing) => {
                tracing::info!(transaction_id = %existing.id, "idempotent replay under lock");
                return Ok(existing);
            }
            Prepared::Ready {
                unit,
                transaction,
                history,
            } => (unit, transaction, history),
        };

        match unit.commit_posting(&transaction, &history).await {
            Ok(()) => {
                tracing::info!(
                    transaction_id = %transaction.id,
                    balance_after = %transaction.balance_after,
                    sequence = history.sequence,
                    "transaction booked"
                );
                Ok(transaction)
            }
            Err(StoreError::UniqueViolation(detail)) => {
                tracing::info!(%detail, "key booked concurrently, returning existing row");
                self.store
                    .find_transaction_by_key(account.id, &request.idempotency_key)
                    .await?
                    .ok_or(LedgerError::ConcurrencyConflict { attempts: 1 })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Take the account lock and build the rows to commit.
    async fn prepare_posting(
        &self,
        account_id: AccountId,
        request: &PostingRequest,
        amount: Decimal,
    ) -> LedgerResult<Prepared<S::Unit>> {
        let mut unit = self
            .store
            .begin_posting(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound)?;

        if let Some(existing) = unit.find_transaction_by_key(&request.idempotency_key).await? {
            unit.rollback().await?;
            return Ok(Prepared::Replay(existing));
        }

        let locked = unit.account().clone();
        if !locked.is_active() {
            return reject(unit, LedgerError::AccountNotAvailable(locked.status)).await;
        }

        let balance_before = locked.balance;
        let balance_after = match request.direction.apply(balance_before, amount) {
            Some(after) if after < Decimal::ZERO => {
                tracing::info!(balance = %balance_before, "insufficient funds");
                return reject(
                    unit,
                    LedgerError::InsufficientFunds {
                        balance: balance_before,
                        requested: amount,
                    },
                )
                .await;
            }
            Some(after) if after <= money::max_money() => after,
            _ => {
                return reject(
                    unit,
                    LedgerError::Validation("resulting balance exceeds the maximum".to_string()),
                )
                .await;
            }
        };

        let now = self.clock.now();
        let transaction = AccountingTransaction {
            id: TransactionId::new(),
            account_id,
            direction: request.direction,
            operation_type: request.operation_type,
            amount,
            currency: locked.currency,
            balance_before,
            balance_after,
            reference_id: request.reference_id.clone(),
            idempotency_key: request.idempotency_key.clone(),
            correlation_id: request.correlation_id.clone(),
            status: TransactionStatus::Booked,
            created_at: now,
            booked_at: Some(now),
        };
        let history = AccountBalanceHistory::record(&transaction, locked.version + 1);

        Ok(Prepared::Ready {
            unit,
            transaction,
            history,
        })
    }

    /// Post against the customer's account in `currency`, opening it on first use.
    pub async fn post_for_customer(
        &self,
        customer_id: CustomerId,
        currency: &Currency,
        mut request: PostingRequest,
    ) -> LedgerResult<AccountingTransaction> {
        // Reject bad input before an account gets opened for it
        validate_client_posting(&request)?;

        let account = self.ensure_account(customer_id, currency).await?;
        request.currency = Some(currency.clone());
        self.post_transaction(account.id, request).await
    }

    /// Compensate a booked transaction with an opposite-direction adjustment.
    ///
    /// The reversal uses the reserved key `reversal:<id>`, so reversing twice returns the
    /// first reversal. Reversal rows themselves cannot be reversed.
    #[instrument(skip_all, fields(transaction_id = %transaction_id))]
    pub async fn reverse_transaction(
        &self,
        transaction_id: TransactionId,
        correlation_id: Option<String>,
    ) -> LedgerResult<AccountingTransaction> {
        let original = self.get_transaction(transaction_id).await?;

        if original.status != TransactionStatus::Booked {
            return Err(LedgerError::Validation(format!(
                "only booked transactions can be reversed, this one is {:?}",
                original.status
            )));
        }
        if is_reversal(&original) {
            return Err(LedgerError::Validation(
                "a reversal cannot itself be reversed".to_string(),
            ));
        }

        let request = PostingRequest {
            direction: original.direction.opposite(),
            operation_type: OperationType::Adjustment,
            amount: original.amount,
            reference_id: original.id.to_string(),
            idempotency_key: reversal_key(original.id),
            correlation_id: correlation_id.or(original.correlation_id),
            currency: Some(original.currency),
        };
        let amount = validate_posting(&request)?;

        let reversal = self
            .book_posting(original.account_id, request.clone(), amount)
            .await?;

        // A replay under the reserved key must be the compensation itself
        if reversal.reference_id != request.reference_id
            || reversal.direction != request.direction
            || reversal.amount != amount
            || reversal.operation_type != OperationType::Adjustment
        {
            tracing::error!(
                reversal_id = %reversal.id,
                "row under the reversal key does not compensate the original"
            );
            return Err(LedgerError::Validation(format!(
                "key {} holds a row that is not the reversal of {}",
                request.idempotency_key, original.id
            )));
        }

        Ok(reversal)
    }

    pub async fn get_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> LedgerResult<AccountingTransaction> {
        self.store
            .get_transaction(transaction_id)
            .await?
            .ok_or(LedgerError::TransactionNotFound)
    }

    /// All transactions of an account, oldest first.
    pub async fn list_transactions(
        &self,
        account_id: AccountId,
    ) -> LedgerResult<Vec<AccountingTransaction>> {
        self.get_account(account_id).await?;
        Ok(self.store.list_transactions(account_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;
    use crate::clock::SystemClock;
    use crate::models::transaction::Direction;
    use crate::services::LedgerSettings;
    use crate::store::MemoryStore;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn ledger() -> LedgerService<MemoryStore> {
        LedgerService::new(
            MemoryStore::default(),
            LedgerSettings::default(),
            Arc::new(SystemClock),
        )
    }

    fn posting(direction: Direction, amount: &str, key: &str) -> PostingRequest {
        PostingRequest {
            direction,
            operation_type: OperationType::TopUp,
            amount: dec(amount),
            reference_id: format!("ref-{key}"),
            idempotency_key: key.to_string(),
            correlation_id: None,
            currency: None,
        }
    }

    async fn funded(ledger: &LedgerService<MemoryStore>, amount: &str) -> Account {
        let account = ledger
            .ensure_account(CustomerId::new(), &Currency::new("TRY").unwrap())
            .await
            .unwrap();
        ledger
            .post_transaction(account.id, posting(Direction::Credit, amount, "seed"))
            .await
            .unwrap();
        account
    }

    #[rstest]
    #[case::zero("0")]
    #[case::negative("-5")]
    #[case::too_precise("1.005")]
    fn invalid_amounts_fail_validation(#[case] amount: &str) {
        let request = posting(Direction::Credit, amount, "k");
        assert!(matches!(
            validate_posting(&request),
            Err(LedgerError::Validation(_))
        ));
    }

    #[rstest]
    #[case::empty_key(String::new(), "ref".to_string())]
    #[case::blank_key("   ".to_string(), "ref".to_string())]
    #[case::long_key("k".repeat(129), "ref".to_string())]
    #[case::long_reference("k".to_string(), "r".repeat(129))]
    fn oversized_or_empty_tokens_fail_validation(#[case] key: String, #[case] reference: String) {
        let mut request = posting(Direction::Credit, "1", &key);
        request.reference_id = reference;
        assert!(matches!(
            validate_posting(&request),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn key_of_exactly_max_length_is_accepted() {
        let request = posting(Direction::Credit, "1", &"k".repeat(MAX_TOKEN_LEN));
        assert_eq!(validate_posting(&request).unwrap(), dec("1.00"));
    }

    #[tokio::test]
    async fn credit_then_debit_moves_balance_and_chains_versions() {
        let ledger = ledger();
        let account = funded(&ledger, "100.00").await;

        let debit = ledger
            .post_transaction(account.id, posting(Direction::Debit, "30.25", "d1"))
            .await
            .unwrap();

        assert_eq!(debit.balance_before, dec("100.00"));
        assert_eq!(debit.balance_after, dec("69.75"));
        assert_eq!(debit.status, TransactionStatus::Booked);
        assert_eq!(debit.booked_at, Some(debit.created_at));

        let after = ledger.get_account(account.id).await.unwrap();
        assert_eq!(after.balance, dec("69.75"));
        assert_eq!(after.version, 2);
    }

    #[tokio::test]
    async fn debit_to_exactly_zero_is_allowed() {
        let ledger = ledger();
        let account = funded(&ledger, "10.00").await;

        let debit = ledger
            .post_transaction(account.id, posting(Direction::Debit, "10", "d1"))
            .await
            .unwrap();

        assert_eq!(debit.balance_after, Decimal::ZERO);
    }

    #[tokio::test]
    async fn replay_with_different_payload_returns_original() {
        let ledger = ledger();
        let account = funded(&ledger, "10.00").await;

        let replay = ledger
            .post_transaction(account.id, posting(Direction::Credit, "999", "seed"))
            .await
            .unwrap();

        assert_eq!(replay.amount, dec("10.00"));
        assert_eq!(ledger.get_account(account.id).await.unwrap().balance, dec("10.00"));
    }

    #[tokio::test]
    async fn post_to_unknown_account_is_not_found() {
        let err = ledger()
            .post_transaction(AccountId::new(), posting(Direction::Credit, "1", "k"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound));
    }

    #[tokio::test]
    async fn currency_mismatch_is_rejected() {
        let ledger = ledger();
        let account = funded(&ledger, "10.00").await;
        let mut request = posting(Direction::Credit, "1", "k");
        request.currency = Some(Currency::new("USD").unwrap());

        let err = ledger.post_transaction(account.id, request).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn reversal_restores_balance_once() {
        let ledger = ledger();
        let account = funded(&ledger, "50.00").await;
        let debit = ledger
            .post_transaction(account.id, posting(Direction::Debit, "20", "d1"))
            .await
            .unwrap();

        let first = ledger.reverse_transaction(debit.id, None).await.unwrap();
        let second = ledger
            .reverse_transaction(debit.id, Some("retry".into()))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.direction, Direction::Credit);
        assert_eq!(first.operation_type, OperationType::Adjustment);
        assert_eq!(first.reference_id, debit.id.to_string());
        assert_eq!(ledger.get_account(account.id).await.unwrap().balance, dec("50.00"));

        // The original row is untouched
        assert_eq!(ledger.get_transaction(debit.id).await.unwrap(), debit);
    }

    #[tokio::test]
    async fn reversal_of_a_reversal_is_rejected() {
        let ledger = ledger();
        let account = funded(&ledger, "5.00").await;
        let seed = ledger.list_transactions(account.id).await.unwrap().remove(0);
        let reversal = ledger.reverse_transaction(seed.id, None).await.unwrap();

        let err = ledger.reverse_transaction(reversal.id, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn reversal_of_spent_credit_needs_funds() {
        let ledger = ledger();
        let account = funded(&ledger, "5.00").await;
        let seed = ledger.list_transactions(account.id).await.unwrap().remove(0);
        ledger
            .post_transaction(account.id, posting(Direction::Debit, "5", "spend"))
            .await
            .unwrap();

        let err = ledger.reverse_transaction(seed.id, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn unknown_transaction_is_not_found() {
        let err = ledger()
            .reverse_transaction(TransactionId::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransactionNotFound));
    }

    #[tokio::test]
    async fn invalid_customer_posting_opens_no_account() {
        let ledger = ledger();
        let customer = CustomerId::new();
        let currency = Currency::new("TRY").unwrap();

        let err = ledger
            .post_for_customer(customer, &currency, posting(Direction::Credit, "0", "k"))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(matches!(
            ledger.get_balance(customer, &currency).await,
            Err(LedgerError::AccountNotFound)
        ));
    }

    #[tokio::test]
    async fn reserved_reversal_key_is_refused_for_callers() {
        let ledger = ledger();
        let account = funded(&ledger, "50.00").await;
        let debit = ledger
            .post_transaction(account.id, posting(Direction::Debit, "20", "d1"))
            .await
            .unwrap();

        let err = ledger
            .post_transaction(
                account.id,
                posting(Direction::Credit, "1", &reversal_key(debit.id)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let reversal = ledger.reverse_transaction(debit.id, None).await.unwrap();
        assert_eq!(reversal.amount, dec("20.00"));
        assert_eq!(reversal.operation_type, OperationType::Adjustment);
        assert_eq!(reversal.reference_id, debit.id.to_string());
        assert_eq!(ledger.get_account(account.id).await.unwrap().balance, dec("50.00"));
    }

    #[tokio::test]
    async fn foreign_row_under_reversal_key_is_not_returned_as_reversal() {
        let store = MemoryStore::default();
        let ledger = LedgerService::new(
            store.clone(),
            LedgerSettings::default(),
            Arc::new(SystemClock),
        );
        let account = funded(&ledger, "50.00").await;
        let debit = ledger
            .post_transaction(account.id, posting(Direction::Debit, "20", "d1"))
            .await
            .unwrap();

        // Book an unrelated credit under the reserved key, bypassing the service
        let unit = store.begin_posting(account.id).await.unwrap().unwrap();
        let locked = unit.account().clone();
        let squatter = AccountingTransaction {
            id: TransactionId::new(),
            account_id: account.id,
            direction: Direction::Credit,
            operation_type: OperationType::TopUp,
            amount: dec("1.00"),
            currency: locked.currency.clone(),
            balance_before: locked.balance,
            balance_after: locked.balance + dec("1.00"),
            reference_id: "elsewhere".to_string(),
            idempotency_key: reversal_key(debit.id),
            correlation_id: None,
            status: TransactionStatus::Booked,
            created_at: debit.created_at,
            booked_at: Some(debit.created_at),
        };
        let history = AccountBalanceHistory::record(&squatter, locked.version + 1);
        unit.commit_posting(&squatter, &history).await.unwrap();

        let err = ledger.reverse_transaction(debit.id, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn caller_adjustment_referencing_another_row_can_be_reversed() {
        let ledger = ledger();
        let account = funded(&ledger, "10.00").await;
        let seed = ledger.list_transactions(account.id).await.unwrap().remove(0);

        let mut request = posting(Direction::Debit, "4", "manual-fix");
        request.operation_type = OperationType::Adjustment;
        request.reference_id = seed.id.to_string();
        let adjustment = ledger.post_transaction(account.id, request).await.unwrap();

        let reversal = ledger.reverse_transaction(adjustment.id, None).await.unwrap();
        assert_eq!(reversal.direction, Direction::Credit);
        assert_eq!(ledger.get_account(account.id).await.unwrap().balance, dec("10.00"));
    }
}
