mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use common::t0;
use ledger_service::clock::ManualClock;
use ledger_service::models::ids::{CustomerId, TransactionId};
use ledger_service::store::MemoryStore;
use ledger_service::{AppState, LedgerService, LedgerSettings, router};
use serde_json::{Value, json};
use tower::ServiceExt;

fn app() -> Router {
    let ledger = LedgerService::new(
        MemoryStore::default(),
        LedgerSettings::default(),
        Arc::new(ManualClock::new(t0())),
    );
    router(AppState::new(ledger))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn post_body(customer: CustomerId, direction: &str, amount: &str, key: &str) -> Value {
    json!({
        "customer_id": customer,
        "currency": "TRY",
        "direction": direction,
        "operation_type": if direction == "credit" { "top_up" } else { "transfer_out" },
        "amount": amount,
        "reference_id": format!("ref-{key}"),
        "idempotency_key": key
    })
}

#[tokio::test]
async fn health_reports_connected_storage() {
    let (status, body) = send(&app(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn create_account_is_idempotent_and_starts_at_zero() {
    let app = app();
    let customer = CustomerId::new();
    let body = json!({ "customer_id": customer, "currency": "try" });

    let (status, first) = send(&app, Method::POST, "/api/v1/accounts", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["balance"], "0.00");
    assert_eq!(first["currency"], "TRY");
    assert_eq!(first["status"], "active");

    let (status, second) = send(&app, Method::POST, "/api/v1/accounts", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["id"], first["id"]);

    let uri = format!("/api/v1/accounts/{}", first["id"].as_str().unwrap());
    let (status, fetched) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["customer_id"], json!(customer));
}

#[tokio::test]
async fn posting_flow_over_http() {
    let app = app();
    let customer = CustomerId::new();

    let (status, credit) = send(
        &app,
        Method::POST,
        "/api/v1/transactions",
        Some(post_body(customer, "credit", "100.00", "K1")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(credit["balance_before"], "0.00");
    assert_eq!(credit["balance_after"], "100.00");
    assert_eq!(credit["status"], "booked");

    let (status, replay) = send(
        &app,
        Method::POST,
        "/api/v1/transactions",
        Some(post_body(customer, "credit", "100.00", "K1")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["id"], credit["id"]);

    let (status, err) = send(
        &app,
        Method::POST,
        "/api/v1/transactions",
        Some(post_body(customer, "debit", "150.00", "K2")),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["error"]["code"], "insufficient_funds");
    assert_eq!(err["error"]["retriable"], false);

    let balance_uri = format!("/api/v1/customers/{customer}/balances/TRY");
    let (status, balance) = send(&app, Method::GET, &balance_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(balance["balance"], "100.00");

    let usage_uri = format!(
        "/api/v1/customers/{customer}/usage?currency=TRY&metric=transaction_amount&period=daily"
    );
    let (status, usage) = send(&app, Method::GET, &usage_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(usage["value"], "100.00");
    assert_eq!(usage["period"], "daily");
    assert_eq!(usage["from"], "2025-03-12T00:00:00Z");

    let account_id = credit["account_id"].as_str().unwrap();
    let (status, history) = send(
        &app,
        Method::GET,
        &format!("/api/v1/accounts/{account_id}/history"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["sequence"], 1);
}

#[tokio::test]
async fn reversal_over_http_accepts_empty_body() {
    let app = app();
    let customer = CustomerId::new();
    let (_, credit) = send(
        &app,
        Method::POST,
        "/api/v1/transactions",
        Some(post_body(customer, "credit", "12.34", "K1")),
    )
    .await;

    let uri = format!("/api/v1/transactions/{}/reversal", credit["id"].as_str().unwrap());
    let (status, reversal) = send(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reversal["direction"], "debit");
    assert_eq!(reversal["operation_type"], "adjustment");
    assert_eq!(reversal["balance_after"], "0.00");

    let list_uri = format!(
        "/api/v1/accounts/{}/transactions",
        credit["account_id"].as_str().unwrap()
    );
    let (_, list) = send(&app, Method::GET, &list_uri, None).await;
    assert_eq!(list.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let app = app();
    let customer = CustomerId::new();

    // No account yet
    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/customers/{customer}/balances/TRY"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "account_not_found");

    // Too many decimals
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/transactions",
        Some(post_body(customer, "credit", "1.001", "K1")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    // Unknown transaction
    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/api/v1/transactions/{}", TransactionId::new()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Inverted range
    let (status, _) = send(
        &app,
        Method::GET,
        &format!(
            "/api/v1/customers/{customer}/usage?currency=TRY&metric=transaction_count\
             &from=2025-03-12T10:00:00Z&to=2025-03-12T09:00:00Z"
        ),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn blocked_account_answers_conflict() {
    let app = app();
    let customer = CustomerId::new();
    let (_, account) = send(
        &app,
        Method::POST,
        "/api/v1/accounts",
        Some(json!({ "customer_id": customer, "currency": "TRY" })),
    )
    .await;
    let id = account["id"].as_str().unwrap();

    let (status, blocked) = send(
        &app,
        Method::PATCH,
        &format!("/api/v1/accounts/{id}/status"),
        Some(json!({ "status": "blocked" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(blocked["status"], "blocked");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/transactions",
        Some(post_body(customer, "credit", "1", "K1")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "account_not_available");
}

#[tokio::test]
async fn malformed_requests_answer_validation_errors() {
    let app = app();
    let customer = CustomerId::new();

    let mut bad_currency = post_body(customer, "credit", "1.00", "K1");
    bad_currency["currency"] = json!("TRYY");
    let mut bad_direction = post_body(customer, "credit", "1.00", "K2");
    bad_direction["direction"] = json!("sideways");

    for body in [bad_currency, bad_direction] {
        let (status, body) = send(&app, Method::POST, "/api/v1/transactions", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");
        assert_eq!(body["error"]["retriable"], false);
    }

    let uris = [
        format!("/api/v1/customers/{customer}/balances/XX"),
        "/api/v1/accounts/not-a-uuid".to_string(),
        format!("/api/v1/customers/{customer}/usage?currency=TRY&metric=bogus"),
    ];
    for uri in uris {
        let (status, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"]["code"], "validation_error", "{uri}");
    }
}

#[tokio::test]
async fn reserved_reversal_key_is_refused() {
    let app = app();
    let customer = CustomerId::new();
    let key = format!("reversal:{}", TransactionId::new());

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/transactions",
        Some(post_body(customer, "credit", "1.00", &key)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}
