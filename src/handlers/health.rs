//! Health check endpoint for service monitoring.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{app::AppState, error::LedgerError, store::LedgerStore};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status
    pub status: String,

    /// Storage connectivity
    pub storage: String,

    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "storage": "connected",
///   "timestamp": "2025-12-21T19:00:00Z"
/// }
/// ```
///
/// Returns 503 with the standard error body when storage is unreachable.
pub async fn health_check<S: LedgerStore>(
    State(state): State<AppState<S>>,
) -> Result<Json<HealthResponse>, LedgerError> {
    state.ledger.check_storage().await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        storage: "connected".to_string(),
        timestamp: Utc::now(),
    }))
}
