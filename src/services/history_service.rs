//! Read access to the balance-history log.

use chrono::{DateTime, Utc};

use super::LedgerService;
use crate::error::{LedgerError, LedgerResult};
use crate::models::TimeRange;
use crate::models::history::AccountBalanceHistory;
use crate::models::ids::AccountId;
use crate::store::LedgerStore;

impl<S: LedgerStore> LedgerService<S> {
    /// Full history of an account, ordered by `created_at` then `sequence`.
    pub async fn balance_history(
        &self,
        account_id: AccountId,
    ) -> LedgerResult<Vec<AccountBalanceHistory>> {
        self.get_account(account_id).await?;
        Ok(self.store.list_history(account_id, None).await?)
    }

    /// History rows with `created_at` in `[from, to)`.
    pub async fn balance_history_in_range(
        &self,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerResult<Vec<AccountBalanceHistory>> {
        let range = TimeRange::new(from, to)?;
        self.get_account(account_id).await?;
        Ok(self.store.list_history(account_id, Some(range)).await?)
    }

    /// Dispatch on optional bounds as they arrive from a query string.
    ///
    /// Both bounds or neither; one alone is a validation error.
    pub async fn history_for_query(
        &self,
        account_id: AccountId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> LedgerResult<Vec<AccountBalanceHistory>> {
        match (from, to) {
            (None, None) => self.balance_history(account_id).await,
            (Some(from), Some(to)) => self.balance_history_in_range(account_id, from, to).await,
            _ => Err(LedgerError::Validation(
                "history range needs both 'from' and 'to'".to_string(),
            )),
        }
    }
}
