mod mocks;

use std::sync::Arc;

use axum::{Router, http::StatusCode, response::Response};
use common::test_helpers::{TestResult, test_utils::{build_request, check_status_code}};
use common::test_assert_eq;
use http_body_util::BodyExt;
use mocks::{
    Harness, MockGateway, MockGeocoder, delivery_settings, gateway_reporting, product,
    quiet_notifier,
};
use serde_json::{Value, json};
use storefront::{
    StoreError,
    checkout::{CheckoutService, CheckoutSettings},
    delivery::DeliveryCalculator,
    executable_utils::{AppState, NotificationAck, router},
    model::PaymentStatus,
    payment::GatewayStatus,
};
use tower::ServiceExt;

struct TestApp {
    harness: Harness,
    app: Router,
}

async fn test_app(checkout_gateway: MockGateway, status_gateway: MockGateway) -> TestApp {
    let harness = Harness::new(vec![
        product(1, "Tusker Lager", 250.0, 10),
        product(2, "Jameson", 2800.0, 3),
    ])
    .await;

    let mut geocoder = MockGeocoder::new();
    geocoder
        .expect_resolve()
        .returning(|address| Err(StoreError::LocationUnavailable(format!("no match for {}", address))));
    let delivery = DeliveryCalculator::new(delivery_settings(), Arc::new(geocoder));

    let checkout = Arc::new(CheckoutService::new(
        harness.catalog.clone(),
        harness.storage.clone(),
        delivery.clone(),
        Arc::new(checkout_gateway),
        CheckoutSettings {
            currency: "KES".to_string(),
            callback_url: "http://localhost:3000/done".to_string(),
            notification_id: "ipn".to_string(),
        },
    ));
    let reconciler = Arc::new(harness.reconciler(status_gateway, quiet_notifier()));
    let state = AppState::new(harness.catalog.clone(), delivery, checkout, reconciler);

    TestApp {
        app: router(state),
        harness,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> TestResult<Response> {
    let request = build_request(method, uri, body.map(|b| b.to_string()))?;
    Ok(app.clone().oneshot(request).await.unwrap())
}

async fn json_body(response: Response) -> TestResult<Value> {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn test_health_and_metrics_without_recorder() -> TestResult {
    let test = test_app(MockGateway::new(), MockGateway::new()).await;

    let health = send(&test.app, "GET", "/health", None).await?;
    check_status_code(health.status(), StatusCode::OK)?;

    let metrics = send(&test.app, "GET", "/metrics", None).await?;
    check_status_code(metrics.status(), StatusCode::NOT_FOUND)?;
    Ok(())
}

#[tokio::test]
async fn test_product_listing_and_lookup() -> TestResult {
    let test = test_app(MockGateway::new(), MockGateway::new()).await;

    let listing = send(&test.app, "GET", "/api/products?search=tusker", None).await?;
    check_status_code(listing.status(), StatusCode::OK)?;
    let products = json_body(listing).await?;
    test_assert_eq!(products.as_array().map(Vec::len), Some(1));
    test_assert_eq!(products[0]["status"], json!("active"));

    let missing = send(&test.app, "GET", "/api/products/404", None).await?;
    check_status_code(missing.status(), StatusCode::NOT_FOUND)?;
    let body = json_body(missing).await?;
    test_assert_eq!(body["error"], json!("Product 404 not found"));
    Ok(())
}

#[tokio::test]
async fn test_delivery_quote_endpoint() -> TestResult {
    let test = test_app(MockGateway::new(), MockGateway::new()).await;

    let quote = send(
        &test.app,
        "POST",
        "/api/delivery/quote",
        Some(json!({
            "location": { "kind": "coordinates", "latitude": -1.2879, "longitude": 36.95 },
            "subtotal": 1000.0
        })),
    )
    .await?;
    check_status_code(quote.status(), StatusCode::OK)?;
    let body = json_body(quote).await?;
    test_assert_eq!(body["fee"], json!(70.0));
    test_assert_eq!(body["free_delivery_applied"], json!(false));

    let unresolvable = send(
        &test.app,
        "POST",
        "/api/delivery/quote",
        Some(json!({
            "location": { "kind": "manual_address", "address": "Atlantis" },
            "subtotal": 1000.0
        })),
    )
    .await?;
    check_status_code(unresolvable.status(), StatusCode::UNPROCESSABLE_ENTITY)?;

    let negative = send(
        &test.app,
        "POST",
        "/api/delivery/quote",
        Some(json!({ "subtotal": -5.0, "delivery_method": "pickup" })),
    )
    .await?;
    check_status_code(negative.status(), StatusCode::BAD_REQUEST)?;
    Ok(())
}

#[tokio::test]
async fn test_checkout_gateway_failure_is_bad_gateway() -> TestResult {
    let mut gateway = MockGateway::new();
    gateway
        .expect_submit_order()
        .returning(|_| Err(StoreError::gateway("connection refused")));
    let test = test_app(gateway, MockGateway::new()).await;

    let response = send(
        &test.app,
        "POST",
        "/api/checkout",
        Some(json!({
            "items": [{ "product_id": 1, "quantity": 2 }],
            "delivery_method": "pickup"
        })),
    )
    .await?;
    check_status_code(response.status(), StatusCode::BAD_GATEWAY)?;
    Ok(())
}

#[tokio::test]
async fn test_payment_notification_marks_order_paid() -> TestResult {
    let test = test_app(MockGateway::new(), gateway_reporting(GatewayStatus::Completed)).await;
    let order = test.harness.pending_order(&[(1, 2), (2, 3)], "ipn-track").await;

    let uri = format!(
        "/api/payments/ipn?OrderTrackingId=ipn-track&OrderMerchantReference={}&OrderNotificationType=IPNCHANGE",
        order.order_number
    );
    let response = send(&test.app, "GET", &uri, None).await?;
    check_status_code(response.status(), StatusCode::OK)?;
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let ack: NotificationAck = serde_json::from_slice(&bytes)?;
    test_assert_eq!(ack.status, 200);
    test_assert_eq!(ack.order_tracking_id, "ipn-track".to_string());

    // A repeated notification is acknowledged without touching stock again.
    let again = send(&test.app, "GET", &uri, None).await?;
    check_status_code(again.status(), StatusCode::OK)?;

    let stored = test.harness.order(order.id).await;
    test_assert_eq!(stored.payment_status, PaymentStatus::Paid);
    test_assert_eq!(test.harness.stock(1).await.0, 8);
    test_assert_eq!(test.harness.stock(2).await.0, 0);
    Ok(())
}

#[tokio::test]
async fn test_unknown_notification_is_acknowledged_with_error_status() -> TestResult {
    let test = test_app(MockGateway::new(), MockGateway::new()).await;

    let response = send(
        &test.app,
        "POST",
        "/api/payments/ipn",
        Some(json!({ "OrderTrackingId": "nope", "OrderNotificationType": "IPNCHANGE" })),
    )
    .await?;
    check_status_code(response.status(), StatusCode::OK)?;
    let body = json_body(response).await?;
    test_assert_eq!(body["status"], json!(500));
    Ok(())
}

#[tokio::test]
async fn test_admin_endpoints() -> TestResult {
    let test = test_app(MockGateway::new(), gateway_reporting(GatewayStatus::Failed)).await;
    let order = test.harness.pending_order(&[(1, 1)], "admin-track").await;

    let paid = send(
        &test.app,
        "POST",
        &format!("/api/admin/orders/{}/payment", order.id),
        Some(json!({ "action": "mark_paid", "note": "paid at counter" })),
    )
    .await?;
    check_status_code(paid.status(), StatusCode::OK)?;
    let body = json_body(paid).await?;
    test_assert_eq!(body["order"]["payment_status"], json!("paid"));
    test_assert_eq!(test.harness.stock(1).await.0, 9);

    let synced = send(
        &test.app,
        "POST",
        &format!("/api/admin/orders/{}/sync", order.id),
        None,
    )
    .await?;
    check_status_code(synced.status(), StatusCode::OK)?;
    let body = json_body(synced).await?;
    test_assert_eq!(body["order"]["payment_status"], json!("failed"));
    test_assert_eq!(test.harness.stock(1).await.0, 9);

    let unknown = send(&test.app, "POST", "/api/admin/orders/999/sync", None).await?;
    check_status_code(unknown.status(), StatusCode::NOT_FOUND)?;

    let stock = send(
        &test.app,
        "PUT",
        "/api/admin/products/2/stock",
        Some(json!({ "stock_quantity": 0 })),
    )
    .await?;
    check_status_code(stock.status(), StatusCode::OK)?;
    let body = json_body(stock).await?;
    test_assert_eq!(body["status"], json!("out_of_stock"));

    let negative = send(
        &test.app,
        "PUT",
        "/api/admin/products/2/stock",
        Some(json!({ "stock_quantity": -3 })),
    )
    .await?;
    check_status_code(negative.status(), StatusCode::BAD_REQUEST)?;
    Ok(())
}
