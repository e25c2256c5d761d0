#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use ledger_service::clock::ManualClock;
use ledger_service::models::money::Currency;
use ledger_service::models::transaction::{Direction, OperationType, PostingRequest};
use ledger_service::store::MemoryStore;
use ledger_service::{LedgerService, LedgerSettings};
use rust_decimal::Decimal;

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub fn try_() -> Currency {
    Currency::new("TRY").unwrap()
}

/// Wednesday 2025-03-12 10:00 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 12, 10, 0, 0).unwrap()
}

pub struct TestLedger {
    pub ledger: LedgerService<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

pub fn ledger() -> TestLedger {
    ledger_with(LedgerSettings::default())
}

pub fn ledger_with(settings: LedgerSettings) -> TestLedger {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = MemoryStore::new(settings.lock_timeout);
    TestLedger {
        ledger: LedgerService::new(store, settings, clock.clone()),
        clock,
    }
}

/// Settings that give up quickly on a contended account.
pub fn impatient() -> LedgerSettings {
    LedgerSettings {
        max_retries: 2,
        retry_backoff: Duration::from_millis(5),
        lock_timeout: Duration::from_millis(30),
        posting_timeout: Duration::from_millis(200),
    }
}

pub fn posting(direction: Direction, amount: &str, key: &str) -> PostingRequest {
    PostingRequest {
        direction,
        operation_type: match direction {
            Direction::Credit => OperationType::TopUp,
            Direction::Debit => OperationType::TransferOut,
        },
        amount: dec(amount),
        reference_id: format!("ref-{key}"),
        idempotency_key: key.to_string(),
        correlation_id: None,
        currency: None,
    }
}
