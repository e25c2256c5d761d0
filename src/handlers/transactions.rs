//! Transaction HTTP handlers.
//!
//! This module implements transaction-related API endpoints:
//! - POST /api/v1/transactions - Post a credit or debit for a customer's currency account
//! - GET /api/v1/transactions/{id} - Get transaction details
//! - POST /api/v1/transactions/{id}/reversal - Compensate a booked transaction
//! - GET /api/v1/accounts/{id}/transactions - List an account's transactions

use axum::{
    Json,
    body::Bytes,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
};

use crate::{
    app::AppState,
    error::LedgerError,
    models::{
        ids::{AccountId, TransactionId},
        transaction::{AccountingTransaction, PostTransactionRequest, ReverseTransactionRequest},
    },
    store::LedgerStore,
};

/// Post a transaction.
///
/// The account of `(customer_id, currency)` is opened on first use.
///
/// # Request Body
///
/// ```json
/// {
///   "customer_id": "550e8400-...",
///   "currency": "TRY",
///   "direction": "debit",
///   "operation_type": "transfer_out",
///   "amount": "25.00",
///   "reference_id": "transfer-9",
///   "idempotency_key": "transfer-9-out",
///   "correlation_id": "saga-17"
/// }
/// ```
///
/// # Response (200)
///
/// The booked transaction. Sending the same `idempotency_key` again returns the same row
/// with the same status code, so clients can retry after a lost response.
///
/// ```json
/// {
///   "id": "770e8400-...",
///   "account_id": "7a1f...",
///   "direction": "debit",
///   "operation_type": "transfer_out",
///   "amount": "25.00",
///   "currency": "TRY",
///   "balance_before": "100.00",
///   "balance_after": "75.00",
///   "status": "booked",
///   ...
/// }
/// ```
pub async fn post_transaction<S: LedgerStore>(
    State(state): State<AppState<S>>,
    request: Result<Json<PostTransactionRequest>, JsonRejection>,
) -> Result<Json<AccountingTransaction>, LedgerError> {
    let Json(request) = request?;
    let (customer_id, currency, posting) = request.into_parts();
    let transaction = state
        .ledger
        .post_for_customer(customer_id, &currency, posting)
        .await?;

    Ok(Json(transaction))
}

/// Get transaction by ID.
pub async fn get_transaction<S: LedgerStore>(
    State(state): State<AppState<S>>,
    transaction_id: Result<Path<TransactionId>, PathRejection>,
) -> Result<Json<AccountingTransaction>, LedgerError> {
    let Path(transaction_id) = transaction_id?;
    let transaction = state.ledger.get_transaction(transaction_id).await?;
    Ok(Json(transaction))
}

/// Reverse a booked transaction.
///
/// The body is optional; it may carry a `correlation_id` for the compensating row.
/// Reversing twice returns the first reversal.
pub async fn reverse_transaction<S: LedgerStore>(
    State(state): State<AppState<S>>,
    transaction_id: Result<Path<TransactionId>, PathRejection>,
    body: Bytes,
) -> Result<Json<AccountingTransaction>, LedgerError> {
    let Path(transaction_id) = transaction_id?;
    let request: ReverseTransactionRequest = if body.is_empty() {
        ReverseTransactionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| LedgerError::Validation(format!("invalid reversal body: {e}")))?
    };
    let reversal = state
        .ledger
        .reverse_transaction(transaction_id, request.correlation_id)
        .await?;

    Ok(Json(reversal))
}

/// All transactions of an account, oldest first.
pub async fn list_transactions<S: LedgerStore>(
    State(state): State<AppState<S>>,
    account_id: Result<Path<AccountId>, PathRejection>,
) -> Result<Json<Vec<AccountingTransaction>>, LedgerError> {
    let Path(account_id) = account_id?;
    let transactions = state.ledger.list_transactions(account_id).await?;
    Ok(Json(transactions))
}
