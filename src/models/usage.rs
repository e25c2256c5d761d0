//! Usage metrics computed over booked transactions.
//!
//! Limit-enforcement code outside the ledger asks questions such as "how much did this
//! customer move in TRY today?" These types describe the question and the answer.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::TimeRange;
use crate::models::ids::{AccountId, CustomerId};
use crate::models::money::Currency;
use crate::models::transaction::{Direction, OperationType};

/// What to aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Number of booked transactions.
    TransactionCount,
    /// Sum of booked amounts, unsigned.
    TransactionAmount,
}

/// Calendar window, evaluated in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsagePeriod {
    Daily,
    /// ISO week, Monday 00:00 to the next Monday.
    Weekly,
    Monthly,
    /// An explicit caller-supplied range.
    Custom,
}

impl UsagePeriod {
    /// Resolve the calendar window containing `now` as `[start, next_start)`.
    ///
    /// `Custom` has no calendar meaning and resolves to `None`.
    pub fn window(self, now: DateTime<Utc>) -> Option<TimeRange> {
        let today = now.date_naive();
        let (start, end) = match self {
            UsagePeriod::Daily => (today, today.succ_opt()?),
            UsagePeriod::Weekly => {
                let monday = today - Duration::days(today.weekday().num_days_from_monday().into());
                (monday, monday + Duration::days(7))
            }
            UsagePeriod::Monthly => {
                let first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?;
                let next = if today.month() == 12 {
                    NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)?
                };
                (first, next)
            }
            UsagePeriod::Custom => return None,
        };

        Some(TimeRange {
            from: start.and_time(NaiveTime::MIN).and_utc(),
            to: end.and_time(NaiveTime::MIN).and_utc(),
        })
    }
}

/// Store-level filter over booked transactions of one account.
#[derive(Debug, Clone)]
pub struct UsageFilter {
    pub account_id: AccountId,
    pub range: TimeRange,
    pub direction: Option<Direction>,
    pub operation_type: Option<OperationType>,
}

/// Raw aggregate returned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct UsageTotals {
    pub count: i64,
    pub amount: Decimal,
}

/// Where the usage window comes from.
#[derive(Debug, Clone, Copy)]
pub enum UsageWindow {
    Period(UsagePeriod),
    Range(TimeRange),
}

/// Engine-level usage question.
#[derive(Debug, Clone)]
pub struct UsageRequest {
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub metric: MetricType,
    pub window: UsageWindow,
    pub direction: Option<Direction>,
    pub operation_type: Option<OperationType>,
}

/// Answer to a [`UsageRequest`], also the HTTP response body.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub customer_id: CustomerId,
    pub currency: Currency,
    pub metric: MetricType,
    pub period: UsagePeriod,
    pub value: Decimal,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Query string for `GET /api/v1/customers/{customer_id}/usage`.
///
/// When both `from` and `to` are present they win over `period`; `period` defaults to
/// `daily`.
#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub currency: Currency,
    pub metric: MetricType,
    pub period: Option<UsagePeriod>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub direction: Option<Direction>,
    pub operation_type: Option<OperationType>,
}
