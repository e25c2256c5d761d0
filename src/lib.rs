//! Ledger Service
//!
//! Per-customer, per-currency accounts with an idempotent, atomic transaction poster, an
//! append-only balance history and usage aggregation for limit checks.
//!
//! # Architecture
//!
//! - **Engine**: [`services::LedgerService`], generic over its [`store::LedgerStore`]
//! - **Storage**: PostgreSQL via sqlx ([`store::PgStore`]) or in-memory ([`store::MemoryStore`])
//! - **Transport**: Axum JSON API ([`app::router`])
//! - **Money**: `rust_decimal` at two decimal places

pub mod app;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod store;

pub use app::{AppState, router};
pub use error::{LedgerError, LedgerResult};
pub use services::{LedgerService, LedgerSettings};
