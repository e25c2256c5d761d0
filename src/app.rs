//! HTTP application wiring: shared state and the route table.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::services::LedgerService;
use crate::store::LedgerStore;

/// State shared with every handler.
pub struct AppState<S> {
    pub ledger: Arc<LedgerService<S>>,
}

impl<S> AppState<S> {
    pub fn new(ledger: LedgerService<S>) -> Self {
        Self {
            ledger: Arc::new(ledger),
        }
    }
}

// Manual impl: the store itself does not need to be Clone
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
        }
    }
}

/// Build the router for a ledger backed by any store.
pub fn router<S: LedgerStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check::<S>))
        // Accounts
        .route("/api/v1/accounts", post(handlers::accounts::create_account::<S>))
        .route("/api/v1/accounts/{id}", get(handlers::accounts::get_account::<S>))
        .route(
            "/api/v1/accounts/{id}/status",
            patch(handlers::accounts::update_account_status::<S>),
        )
        .route(
            "/api/v1/accounts/{id}/transactions",
            get(handlers::transactions::list_transactions::<S>),
        )
        .route(
            "/api/v1/accounts/{id}/history",
            get(handlers::accounts::balance_history::<S>),
        )
        .route(
            "/api/v1/customers/{customer_id}/balances/{currency}",
            get(handlers::accounts::get_balance::<S>),
        )
        // Postings
        .route(
            "/api/v1/transactions",
            post(handlers::transactions::post_transaction::<S>),
        )
        .route(
            "/api/v1/transactions/{id}",
            get(handlers::transactions::get_transaction::<S>),
        )
        .route(
            "/api/v1/transactions/{id}/reversal",
            post(handlers::transactions::reverse_transaction::<S>),
        )
        // Usage
        .route(
            "/api/v1/customers/{customer_id}/usage",
            get(handlers::usage::get_usage::<S>),
        )
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
