//! HTTP request handlers (route handlers).
//!
//! Each handler extracts the request data, calls one ledger operation and turns the result
//! into JSON. Errors are `LedgerError`, which renders itself as an HTTP response.

/// Account, balance and history endpoints
pub mod accounts;
/// Liveness and storage check
pub mod health;
/// Posting, lookup and reversal endpoints
pub mod transactions;
/// Usage metrics endpoint
pub mod usage;
