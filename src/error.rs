//! Error types and HTTP error response handling.
//!
//! This module defines every error the ledger engine can return and how each one is
//! converted into an HTTP response with an appropriate status code and JSON body.

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde_json::json;

use crate::models::account::AccountStatus;
use crate::store::StoreError;

/// Ledger-wide error type.
///
/// # Error Categories
///
/// - **Input errors**: `Validation`; detected before any write, never retried
/// - **Lookup errors**: `AccountNotFound`, `TransactionNotFound`
/// - **Business rule errors**: `AccountNotAvailable`, `InsufficientFunds`; nothing written
/// - **Contention**: `ConcurrencyConflict`; retriable by the caller with backoff
/// - **Infrastructure**: `StorageFault`; the caller may retry with the same idempotency key
///
/// A replayed idempotency key is not an error: the original transaction is returned.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Malformed input: non-positive amount, wrong scale, currency mismatch, bad range.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("{0}")]
    Validation(String),

    /// No account for the (customer, currency) pair or account id.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Account not found")]
    AccountNotFound,

    /// Returns HTTP 404 Not Found.
    #[error("Transaction not found")]
    TransactionNotFound,

    /// Account exists but is blocked or closed.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Account is {0} and does not accept postings")]
    AccountNotAvailable(AccountStatus),

    /// A debit would drive the balance below zero.
    ///
    /// Returns HTTP 422 Unprocessable Entity.
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },

    /// Contention on one account outlasted the bounded retry budget.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Account is busy, gave up after {attempts} attempt(s)")]
    ConcurrencyConflict { attempts: u32 },

    /// Durable storage failed.
    ///
    /// Returns HTTP 503 Service Unavailable (details hidden from the client).
    #[error("Storage fault: {0}")]
    StorageFault(StoreError),
}

/// Result alias used by the engine.
pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    /// Whether a caller may usefully retry the same request.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrencyConflict { .. } | LedgerError::StorageFault(_)
        )
    }
}

/// Lock timeouts and serialization failures surface as contention; everything else is a
/// storage fault.
impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        if err.is_contention() {
            LedgerError::ConcurrencyConflict { attempts: 1 }
        } else {
            LedgerError::StorageFault(err)
        }
    }
}

/// Malformed request bodies, paths and query strings are validation errors.
impl From<JsonRejection> for LedgerError {
    fn from(rejection: JsonRejection) -> Self {
        LedgerError::Validation(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for LedgerError {
    fn from(rejection: PathRejection) -> Self {
        LedgerError::Validation(format!("invalid path: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for LedgerError {
    fn from(rejection: QueryRejection) -> Self {
        LedgerError::Validation(format!("invalid query: {}", rejection.body_text()))
    }
}

/// Convert LedgerError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "insufficient_funds",
///     "message": "Insufficient funds: balance 100.00, requested 150.00"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `Validation` → 400 Bad Request
/// - `AccountNotFound`, `TransactionNotFound` → 404 Not Found
/// - `AccountNotAvailable`, `ConcurrencyConflict` → 409 Conflict
/// - `InsufficientFunds` → 422 Unprocessable Entity
/// - `StorageFault` → 503 Service Unavailable
impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            LedgerError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            LedgerError::AccountNotFound => (StatusCode::NOT_FOUND, "account_not_found"),
            LedgerError::TransactionNotFound => (StatusCode::NOT_FOUND, "transaction_not_found"),
            LedgerError::AccountNotAvailable(_) => (StatusCode::CONFLICT, "account_not_available"),
            LedgerError::InsufficientFunds { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_funds")
            }
            LedgerError::ConcurrencyConflict { .. } => (StatusCode::CONFLICT, "concurrency_conflict"),
            LedgerError::StorageFault(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage_fault"),
        };

        let message = match &self {
            LedgerError::StorageFault(err) => {
                tracing::error!(error = %err, "storage fault while serving request");
                "Storage is temporarily unavailable".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "retriable": self.is_retriable()
            }
        }));

        (status, body).into_response()
    }
}
