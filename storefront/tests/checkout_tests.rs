mod mocks;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mocks::{Harness, MockGateway, delivery_settings, product, unused_geocoder};
use storefront::{
    StoreError,
    checkout::{CartLine, CheckoutRequest, CheckoutService, CheckoutSettings},
    delivery::{CustomerLocation, DeliveryCalculator},
    model::{
        DeliveryMethod, ModelId, NewOrder, Order, OrderStatus, PaymentStatus, PaymentUpdate,
        ShippingAddress,
    },
    payment::SubmitOrderResponse,
    storage::{InMemoryStorage, OrderStorage},
};

fn settings() -> CheckoutSettings {
    CheckoutSettings {
        currency: "KES".to_string(),
        callback_url: "http://localhost:3000/checkout/complete".to_string(),
        notification_id: "ipn-1".to_string(),
    }
}

fn service(harness: &Harness, gateway: MockGateway) -> CheckoutService {
    CheckoutService::new(
        harness.catalog.clone(),
        harness.storage.clone(),
        DeliveryCalculator::new(delivery_settings(), Arc::new(unused_geocoder())),
        Arc::new(gateway),
        settings(),
    )
}

fn accepting_gateway() -> MockGateway {
    let mut gateway = MockGateway::new();
    gateway.expect_submit_order().times(1).returning(|request| {
        Ok(SubmitOrderResponse {
            order_tracking_id: "tracking-abc".to_string(),
            merchant_reference: request.merchant_reference.clone(),
            redirect_url: "https://pay.example/redirect/abc".to_string(),
        })
    });
    gateway
}

fn address() -> ShippingAddress {
    ShippingAddress {
        full_name: "Otieno Ochieng".to_string(),
        phone: "0712 345 678".to_string(),
        email: "otieno@example.com".to_string(),
        street: "Outering Road".to_string(),
        city: "Nairobi".to_string(),
        latitude: None,
        longitude: None,
        notes: None,
    }
}

fn at_store() -> Option<CustomerLocation> {
    Some(CustomerLocation::Coordinates {
        latitude: -1.2879,
        longitude: 36.95,
    })
}

async fn stocked() -> Harness {
    Harness::new(vec![
        product(1, "Tusker Lager", 250.0, 10),
        product(2, "Jameson", 2800.0, 2),
    ])
    .await
}

#[tokio::test]
async fn test_checkout_prices_from_catalog_and_stores_tracking_id() {
    let harness = stocked().await;
    let checkout = service(&harness, accepting_gateway());

    let response = checkout
        .checkout(CheckoutRequest {
            user_id: Some("customer-9".to_string()),
            items: vec![CartLine { product_id: 1, quantity: 4 }],
            delivery_method: DeliveryMethod::Delivery,
            shipping_address: Some(address()),
            location: at_store(),
        })
        .await
        .unwrap();

    assert_eq!(response.delivery_fee, 70.0);
    assert_eq!(response.total_amount, 1070.0);
    assert_eq!(response.redirect_url, "https://pay.example/redirect/abc");
    assert!(response.order_number.starts_with("ORD-"));

    let order = harness.order(response.order_id).await;
    assert_eq!(order.payment_tracking_id.as_deref(), Some("tracking-abc"));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.items[0].price, 250.0);
    assert!(!order.inventory_reduced);
    // Stock only moves once payment is confirmed.
    assert_eq!(harness.stock(1).await.0, 10);
}

#[tokio::test]
async fn test_large_order_ships_free_and_pickup_needs_no_address() {
    let harness = stocked().await;
    let mut gateway = MockGateway::new();
    gateway.expect_submit_order().times(2).returning(|request| {
        Ok(SubmitOrderResponse {
            order_tracking_id: format!("t-{}", request.merchant_reference),
            merchant_reference: request.merchant_reference,
            redirect_url: "https://pay.example".to_string(),
        })
    });
    let checkout = service(&harness, gateway);

    let free = checkout
        .checkout(CheckoutRequest {
            user_id: None,
            items: vec![CartLine { product_id: 2, quantity: 2 }],
            delivery_method: DeliveryMethod::Delivery,
            shipping_address: Some(address()),
            location: at_store(),
        })
        .await
        .unwrap();
    assert_eq!(free.delivery_fee, 0.0);
    assert_eq!(free.total_amount, 5600.0);

    let pickup = checkout
        .checkout(CheckoutRequest {
            user_id: None,
            items: vec![CartLine { product_id: 1, quantity: 1 }],
            delivery_method: DeliveryMethod::Pickup,
            shipping_address: None,
            location: None,
        })
        .await
        .unwrap();
    assert_eq!(pickup.delivery_fee, 0.0);
    assert_ne!(free.order_number, pickup.order_number);
}

#[tokio::test]
async fn test_cart_validation() {
    let harness = stocked().await;
    let mut gateway = MockGateway::new();
    gateway.expect_submit_order().never();
    let checkout = service(&harness, gateway);

    let request = |items: Vec<CartLine>| CheckoutRequest {
        user_id: None,
        items,
        delivery_method: DeliveryMethod::Pickup,
        shipping_address: None,
        location: None,
    };

    let empty = checkout.checkout(request(vec![])).await.unwrap_err();
    assert!(matches!(empty, StoreError::InvalidInput(_)));

    let zero = checkout
        .checkout(request(vec![CartLine { product_id: 1, quantity: 0 }]))
        .await
        .unwrap_err();
    assert!(matches!(zero, StoreError::InvalidInput(_)));

    // Two lines of the same product are checked together against stock.
    let too_many = checkout
        .checkout(request(vec![
            CartLine { product_id: 2, quantity: 2 },
            CartLine { product_id: 2, quantity: 1 },
        ]))
        .await
        .unwrap_err();
    assert!(matches!(too_many, StoreError::InvalidInput(_)));

    let unknown = checkout
        .checkout(request(vec![CartLine { product_id: 77, quantity: 1 }]))
        .await
        .unwrap_err();
    assert!(matches!(unknown, StoreError::ProductNotFound(77)));

    let no_address = checkout
        .checkout(CheckoutRequest {
            delivery_method: DeliveryMethod::Delivery,
            ..request(vec![CartLine { product_id: 1, quantity: 1 }])
        })
        .await
        .unwrap_err();
    assert!(matches!(no_address, StoreError::InvalidInput(_)));
}

#[tokio::test]
async fn test_gateway_failure_keeps_pending_order_with_note() {
    let harness = stocked().await;
    let mut gateway = MockGateway::new();
    gateway
        .expect_submit_order()
        .returning(|_| Err(StoreError::gateway("401 invalid token")));
    let checkout = service(&harness, gateway);

    let err = checkout
        .checkout(CheckoutRequest {
            user_id: None,
            items: vec![CartLine { product_id: 1, quantity: 1 }],
            delivery_method: DeliveryMethod::Delivery,
            shipping_address: Some(address()),
            location: at_store(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Gateway(_)));

    let pending = harness
        .storage
        .list_by_payment_status(PaymentStatus::Pending, 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].payment_tracking_id.is_none());
    assert!(pending[0]
        .admin_note
        .as_deref()
        .unwrap_or_default()
        .contains("401 invalid token"));
}

#[tokio::test]
async fn test_oversized_quantities_are_rejected_before_pricing() {
    let harness = stocked().await;
    let mut gateway = MockGateway::new();
    gateway.expect_submit_order().never();
    let checkout = service(&harness, gateway);

    let pickup = |items: Vec<CartLine>| CheckoutRequest {
        user_id: None,
        items,
        delivery_method: DeliveryMethod::Pickup,
        shipping_address: None,
        location: None,
    };

    let huge = checkout
        .checkout(pickup(vec![CartLine { product_id: 1, quantity: 3_000_000_000 }]))
        .await
        .unwrap_err();
    assert!(matches!(huge, StoreError::InvalidInput(_)));

    // Each line fits, the merged quantity does not.
    let merged = checkout
        .checkout(pickup(vec![
            CartLine { product_id: 1, quantity: 2_000_000_000 },
            CartLine { product_id: 1, quantity: 2_000_000_000 },
        ]))
        .await
        .unwrap_err();
    assert!(matches!(merged, StoreError::InvalidInput(_)));

    let pending = harness
        .storage
        .list_by_payment_status(PaymentStatus::Pending, 10)
        .await
        .unwrap();
    assert!(pending.is_empty());
    assert_eq!(harness.stock(1).await.0, 10);
}

/// Order storage that reports the first `collisions` order numbers as taken.
struct CollidingOrders {
    inner: Arc<InMemoryStorage>,
    collisions: AtomicUsize,
    attempted: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl OrderStorage for CollidingOrders {
    async fn insert_order(&self, order: NewOrder) -> storefront::Result<Order> {
        self.attempted.lock().unwrap().push(order.order_number.clone());
        if self.collisions.load(Ordering::SeqCst) > 0 {
            self.collisions.fetch_sub(1, Ordering::SeqCst);
            return Err(StoreError::DuplicateOrderNumber(order.order_number));
        }
        self.inner.insert_order(order).await
    }

    async fn get_order(&self, id: ModelId) -> storefront::Result<Option<Order>> {
        self.inner.get_order(id).await
    }

    async fn find_by_tracking_id(&self, tracking_id: &str) -> storefront::Result<Option<Order>> {
        self.inner.find_by_tracking_id(tracking_id).await
    }

    async fn find_by_order_number(&self, order_number: &str) -> storefront::Result<Option<Order>> {
        self.inner.find_by_order_number(order_number).await
    }

    async fn list_by_payment_status(
        &self,
        status: PaymentStatus,
        limit: u64,
    ) -> storefront::Result<Vec<Order>> {
        self.inner.list_by_payment_status(status, limit).await
    }

    async fn set_tracking_id(&self, id: ModelId, tracking_id: &str) -> storefront::Result<()> {
        self.inner.set_tracking_id(id, tracking_id).await
    }

    async fn apply_payment_update(&self, id: ModelId, update: PaymentUpdate) -> storefront::Result<Order> {
        self.inner.apply_payment_update(id, update).await
    }

    async fn claim_inventory_reduction(&self, id: ModelId, at: DateTime<Utc>) -> storefront::Result<bool> {
        self.inner.claim_inventory_reduction(id, at).await
    }

    async fn set_admin_note(&self, id: ModelId, note: &str) -> storefront::Result<()> {
        self.inner.set_admin_note(id, note).await
    }
}

fn colliding_service(harness: &Harness, collisions: usize, gateway: MockGateway) -> (CheckoutService, Arc<CollidingOrders>) {
    let orders = Arc::new(CollidingOrders {
        inner: harness.storage.clone(),
        collisions: AtomicUsize::new(collisions),
        attempted: std::sync::Mutex::new(Vec::new()),
    });
    let checkout = CheckoutService::new(
        harness.catalog.clone(),
        orders.clone(),
        DeliveryCalculator::new(delivery_settings(), Arc::new(unused_geocoder())),
        Arc::new(gateway),
        settings(),
    );
    (checkout, orders)
}

fn pickup_one() -> CheckoutRequest {
    CheckoutRequest {
        user_id: None,
        items: vec![CartLine { product_id: 1, quantity: 1 }],
        delivery_method: DeliveryMethod::Pickup,
        shipping_address: None,
        location: None,
    }
}

#[tokio::test]
async fn test_taken_order_number_is_redrawn() {
    let harness = stocked().await;
    let (checkout, orders) = colliding_service(&harness, 2, accepting_gateway());

    let response = checkout.checkout(pickup_one()).await.unwrap();

    let attempted = orders.attempted.lock().unwrap().clone();
    assert_eq!(attempted.len(), 3);
    assert_eq!(attempted.last(), Some(&response.order_number));
    assert!(harness.order(response.order_id).await.payment_tracking_id.is_some());
}

#[tokio::test]
async fn test_order_number_retries_are_bounded() {
    let harness = stocked().await;
    let mut gateway = MockGateway::new();
    gateway.expect_submit_order().never();
    let (checkout, orders) = colliding_service(&harness, 100, gateway);

    let err = checkout.checkout(pickup_one()).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateOrderNumber(_)));
    assert_eq!(orders.attempted.lock().unwrap().len(), 5);
}
