//! Business logic services.
//!
//! [`LedgerService`] is the ledger engine. It is constructed explicitly with its storage
//! dependency, its tuning and a clock; HTTP handlers and tests drive it through the
//! operations spread over the submodules:
//!
//! - `account_service`: resolve/create accounts, balances, status changes
//! - `transaction_service`: the atomic, idempotent posting protocol
//! - `history_service`: read access to the balance-history log
//! - `usage_service`: time-windowed usage over booked transactions

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::store::LedgerStore;

pub mod account_service;
pub mod history_service;
pub mod transaction_service;
pub mod usage_service;

/// Tuning of the posting protocol.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    /// Attempts per operation when the account is contended (at least 1).
    pub max_retries: u32,

    /// Backoff step; attempt `n` sleeps `n * retry_backoff` before retrying.
    pub retry_backoff: Duration,

    /// Longest wait for an account lock. Consumed by the store constructors.
    pub lock_timeout: Duration,

    /// Deadline for the pre-commit phase of one attempt.
    pub posting_timeout: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_millis(25),
            lock_timeout: Duration::from_secs(2),
            posting_timeout: Duration::from_secs(5),
        }
    }
}

/// The ledger engine.
pub struct LedgerService<S> {
    store: S,
    settings: LedgerSettings,
    clock: Arc<dyn Clock>,
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: S, settings: LedgerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            settings,
            clock,
        }
    }

    /// Round trip to storage, used by the health endpoint.
    pub async fn check_storage(&self) -> crate::error::LedgerResult<()> {
        self.store.ping().await?;
        Ok(())
    }

    /// Sleep before retry `attempt` (1-based).
    async fn backoff(&self, attempt: u32) {
        tokio::time::sleep(self.settings.retry_backoff * attempt).await;
    }
}
