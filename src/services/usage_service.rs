//! Usage aggregation over booked transactions.

use rust_decimal::Decimal;
use tracing::instrument;

use super::LedgerService;
use crate::error::{LedgerError, LedgerResult};
use crate::models::TimeRange;
use crate::models::ids::CustomerId;
use crate::models::money::{self, Currency};
use crate::models::transaction::{Direction, OperationType};
use crate::models::usage::{
    MetricType, UsageFilter, UsagePeriod, UsageReport, UsageRequest, UsageWindow,
};
use crate::store::LedgerStore;

impl<S: LedgerStore> LedgerService<S> {
    /// Count or sum the customer's booked transactions in `currency` over `range`.
    ///
    /// Amounts are summed unsigned unless a `direction` narrows the rows. A customer
    /// without an account in that currency has zero usage.
    #[instrument(skip_all, fields(customer_id = %customer_id, currency = %currency))]
    pub async fn calculate_usage(
        &self,
        customer_id: CustomerId,
        currency: &Currency,
        metric: MetricType,
        range: TimeRange,
        direction: Option<Direction>,
        operation_type: Option<OperationType>,
    ) -> LedgerResult<Decimal> {
        let Some(account) = self
            .store
            .find_account_by_owner(customer_id, currency)
            .await?
        else {
            return Ok(match metric {
                MetricType::TransactionCount => Decimal::ZERO,
                MetricType::TransactionAmount => money::zero(),
            });
        };

        let totals = self
            .store
            .usage_totals(&UsageFilter {
                account_id: account.id,
                range,
                direction,
                operation_type,
            })
            .await?;

        Ok(match metric {
            MetricType::TransactionCount => Decimal::from(totals.count),
            MetricType::TransactionAmount => totals.amount,
        })
    }

    /// Resolve the request's window against the clock and compute the metric.
    pub async fn usage_report(&self, request: UsageRequest) -> LedgerResult<UsageReport> {
        let (period, range) = match request.window {
            UsageWindow::Range(range) => (UsagePeriod::Custom, range),
            UsageWindow::Period(period) => {
                let range = period.window(self.clock.now()).ok_or_else(|| {
                    LedgerError::Validation("custom period needs 'from' and 'to'".to_string())
                })?;
                (period, range)
            }
        };

        let value = self
            .calculate_usage(
                request.customer_id,
                &request.currency,
                request.metric,
                range,
                request.direction,
                request.operation_type,
            )
            .await?;

        Ok(UsageReport {
            customer_id: request.customer_id,
            currency: request.currency,
            metric: request.metric,
            period,
            value,
            from: range.from,
            to: range.to,
        })
    }
}
