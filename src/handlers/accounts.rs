//! Account management HTTP handlers.
//!
//! This module implements the account-related API endpoints:
//! - POST /api/v1/accounts - Create (or resolve) the account of a customer/currency pair
//! - GET /api/v1/accounts/{id} - Get account by ID
//! - PATCH /api/v1/accounts/{id}/status - Block, reactivate or close an account
//! - GET /api/v1/accounts/{id}/history - Balance history, optionally in a time range
//! - GET /api/v1/customers/{customer_id}/balances/{currency} - Balance lookup

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
};

use crate::{
    app::AppState,
    error::LedgerError,
    models::{
        account::{AccountResponse, BalanceResponse, CreateAccountRequest, UpdateAccountStatusRequest},
        history::{AccountBalanceHistory, HistoryQuery},
        ids::{AccountId, CustomerId},
        money::Currency,
    },
    store::LedgerStore,
};

/// Create the account for a customer and currency.
///
/// # Request Body
///
/// ```json
/// {
///   "customer_id": "550e8400-e29b-41d4-a716-446655440000",
///   "currency": "TRY"
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: the account, with a zero balance when new. Repeating the request
///   returns the same account.
/// - **400**: malformed currency
pub async fn create_account<S: LedgerStore>(
    State(state): State<AppState<S>>,
    request: Result<Json<CreateAccountRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AccountResponse>), LedgerError> {
    let Json(request) = request?;
    let account = state
        .ledger
        .ensure_account(request.customer_id, &request.currency)
        .await?;

    Ok((StatusCode::CREATED, Json(account.into())))
}

/// Get a specific account by ID.
///
/// - **200 OK**: account details
/// - **404**: unknown account
pub async fn get_account<S: LedgerStore>(
    State(state): State<AppState<S>>,
    account_id: Result<Path<AccountId>, PathRejection>,
) -> Result<Json<AccountResponse>, LedgerError> {
    let Path(account_id) = account_id?;
    let account = state.ledger.get_account(account_id).await?;
    Ok(Json(account.into()))
}

/// Change an account's status.
///
/// # Request Body
///
/// ```json
/// { "status": "blocked" }
/// ```
///
/// # Response
///
/// - **200 OK**: the updated account
/// - **400**: reopening a closed account, or closing one that still holds funds
/// - **404**: unknown account
pub async fn update_account_status<S: LedgerStore>(
    State(state): State<AppState<S>>,
    account_id: Result<Path<AccountId>, PathRejection>,
    request: Result<Json<UpdateAccountStatusRequest>, JsonRejection>,
) -> Result<Json<AccountResponse>, LedgerError> {
    let Path(account_id) = account_id?;
    let Json(request) = request?;
    let account = state
        .ledger
        .update_account_status(account_id, request.status)
        .await?;
    Ok(Json(account.into()))
}

/// Current balance of a customer's currency account.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "account_id": "7a1f...",
///   "customer_id": "550e8400-e29b-41d4-a716-446655440000",
///   "currency": "TRY",
///   "balance": "100.00"
/// }
/// ```
///
/// Returns 404 when the customer has no account in that currency.
pub async fn get_balance<S: LedgerStore>(
    State(state): State<AppState<S>>,
    path: Result<Path<(CustomerId, Currency)>, PathRejection>,
) -> Result<Json<BalanceResponse>, LedgerError> {
    let Path((customer_id, currency)) = path?;
    let account = state.ledger.get_balance(customer_id, &currency).await?;
    Ok(Json(account.into()))
}

/// Balance history of an account, oldest first.
///
/// `from` and `to` (RFC 3339) restrict the rows to `[from, to)`; give both or neither.
pub async fn balance_history<S: LedgerStore>(
    State(state): State<AppState<S>>,
    account_id: Result<Path<AccountId>, PathRejection>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<AccountBalanceHistory>>, LedgerError> {
    let Path(account_id) = account_id?;
    let Query(query) = query?;
    let rows = state
        .ledger
        .history_for_query(account_id, query.from, query.to)
        .await?;
    Ok(Json(rows))
}
