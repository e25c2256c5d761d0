//! Usage metrics endpoint.

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
};

use crate::{
    app::AppState,
    error::LedgerError,
    models::{
        TimeRange,
        ids::CustomerId,
        usage::{UsagePeriod, UsageQuery, UsageReport, UsageRequest, UsageWindow},
    },
    store::LedgerStore,
};

/// Usage of a customer's currency account.
///
/// # Endpoint
///
/// `GET /api/v1/customers/{customer_id}/usage?currency=TRY&metric=transaction_amount&period=daily`
///
/// Optional parameters: `from` and `to` (RFC 3339, both or neither, overriding `period`),
/// `direction` and `operation_type` filters.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "customer_id": "550e8400-...",
///   "currency": "TRY",
///   "metric": "transaction_amount",
///   "period": "daily",
///   "value": "100.00",
///   "from": "2025-12-21T00:00:00Z",
///   "to": "2025-12-22T00:00:00Z"
/// }
/// ```
pub async fn get_usage<S: LedgerStore>(
    State(state): State<AppState<S>>,
    customer_id: Result<Path<CustomerId>, PathRejection>,
    query: Result<Query<UsageQuery>, QueryRejection>,
) -> Result<Json<UsageReport>, LedgerError> {
    let Path(customer_id) = customer_id?;
    let Query(query) = query?;
    let window = match (query.from, query.to) {
        (Some(from), Some(to)) => UsageWindow::Range(TimeRange::new(from, to)?),
        (None, None) => UsageWindow::Period(query.period.unwrap_or(UsagePeriod::Daily)),
        _ => {
            return Err(LedgerError::Validation(
                "usage range needs both 'from' and 'to'".to_string(),
            ));
        }
    };

    let report = state
        .ledger
        .usage_report(UsageRequest {
            customer_id,
            currency: query.currency,
            metric: query.metric,
            window,
            direction: query.direction,
            operation_type: query.operation_type,
        })
        .await?;

    Ok(Json(report))
}
