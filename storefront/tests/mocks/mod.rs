#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::mock;
use storefront::{
    Result, StoreError,
    catalog::ProductCatalog,
    delivery::DeliverySettings,
    geocoding::Geocoder,
    inventory::InventoryService,
    model::{
        Coordinates, DeliveryMethod, ModelId, NewOrder, Order, OrderItem, Product, ProductStatus,
    },
    notifications::Notifier,
    payment::{
        GatewayStatus, PaymentGateway, SubmitOrderRequest, SubmitOrderResponse, TransactionStatus,
    },
    reconciler::PaymentReconciler,
    storage::{InMemoryStorage, InventoryStorage, OrderStorage},
};

mock! {
    pub Gateway {}

    #[async_trait]
    impl PaymentGateway for Gateway {
        async fn submit_order(&self, request: SubmitOrderRequest) -> Result<SubmitOrderResponse>;
        async fn transaction_status(&self, tracking_id: &str) -> Result<TransactionStatus>;
    }
}

mock! {
    pub Geocoder {}

    #[async_trait]
    impl Geocoder for Geocoder {
        async fn resolve(&self, address: &str) -> Result<Coordinates>;
    }
}

mock! {
    pub Notifier {}

    #[async_trait]
    impl Notifier for Notifier {
        async fn payment_confirmed(&self, order: &Order) -> Result<()>;
    }
}

/// Inventory storage whose first `failures` reductions fail like a dropped
/// database connection, writing nothing.
pub struct FlakyInventory {
    inner: Arc<InMemoryStorage>,
    failures: AtomicUsize,
}

impl FlakyInventory {
    pub fn new(inner: Arc<InMemoryStorage>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl InventoryStorage for FlakyInventory {
    async fn reduce_order_inventory(
        &self,
        order_id: ModelId,
        items: &[OrderItem],
        at: DateTime<Utc>,
    ) -> Result<Option<Vec<Option<Product>>>> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Database(sea_orm::DbErr::Custom(
                "connection reset".to_string(),
            )));
        }
        self.inner.reduce_order_inventory(order_id, items, at).await
    }
}

pub fn transaction_status(status: GatewayStatus) -> TransactionStatus {
    TransactionStatus {
        status,
        description: Some(status.to_string()),
        confirmation_code: None,
        amount: None,
        currency: Some("KES".to_string()),
        payment_method: Some("M-Pesa".to_string()),
        merchant_reference: None,
    }
}

/// Gateway that answers every status query with `status`.
pub fn gateway_reporting(status: GatewayStatus) -> MockGateway {
    let mut gateway = MockGateway::new();
    gateway
        .expect_transaction_status()
        .returning(move |_| Ok(transaction_status(status)));
    gateway
}

pub fn quiet_notifier() -> MockNotifier {
    let mut notifier = MockNotifier::new();
    notifier.expect_payment_confirmed().returning(|_| Ok(()));
    notifier
}

pub fn unused_geocoder() -> MockGeocoder {
    let mut geocoder = MockGeocoder::new();
    geocoder.expect_resolve().never();
    geocoder
}

pub fn product(id: ModelId, name: &str, price: f64, stock: i32) -> Product {
    Product {
        id,
        name: name.to_string(),
        category: "beer".to_string(),
        subcategory: Some("lager".to_string()),
        product_type: None,
        price,
        stock_quantity: stock,
        status: if stock > 0 { ProductStatus::Active } else { ProductStatus::OutOfStock },
        brand: None,
        volume: Some("500ml".to_string()),
        description: None,
        image_url: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn delivery_settings() -> DeliverySettings {
    let config = common::sample_config().expect("sample config");
    DeliverySettings::from_config(&config.delivery).expect("delivery settings")
}

pub struct Harness {
    pub storage: Arc<InMemoryStorage>,
    pub catalog: Arc<ProductCatalog>,
    pub inventory: Arc<InventoryService>,
}

impl Harness {
    pub async fn new(products: Vec<Product>) -> Self {
        let storage = Arc::new(
            InMemoryStorage::with_products(products)
                .await
                .expect("seed products"),
        );
        let catalog = Arc::new(ProductCatalog::new(storage.clone(), Duration::from_secs(300)));
        let inventory = Arc::new(
            InventoryService::new(storage.clone()).with_catalog(catalog.clone()),
        );
        Self {
            storage,
            catalog,
            inventory,
        }
    }

    pub fn reconciler(&self, gateway: MockGateway, notifier: MockNotifier) -> PaymentReconciler {
        self.reconciler_with_inventory(self.inventory.clone(), gateway, notifier)
    }

    pub fn reconciler_with_inventory(
        &self,
        inventory: Arc<InventoryService>,
        gateway: MockGateway,
        notifier: MockNotifier,
    ) -> PaymentReconciler {
        PaymentReconciler::new(
            self.storage.clone(),
            Arc::new(gateway),
            inventory,
            Arc::new(notifier),
        )
    }

    /// A pending delivery order for `items` (product id, quantity), already
    /// submitted to the gateway under `tracking_id`.
    pub async fn pending_order(&self, items: &[(ModelId, u32)], tracking_id: &str) -> Order {
        let mut order_items = Vec::new();
        for (product_id, quantity) in items {
            let product = self.catalog.get(*product_id).await.expect("product exists");
            order_items.push(OrderItem {
                product_id: *product_id,
                name: product.name,
                price: product.price,
                quantity: *quantity,
            });
        }
        let subtotal = order_items.iter().map(OrderItem::line_total).sum();
        let order = self
            .storage
            .insert_order(NewOrder {
                order_number: common::generate_unique_id("ORD"),
                user_id: Some("customer-1".to_string()),
                items: order_items,
                subtotal,
                delivery_fee: 70.0,
                total_amount: subtotal + 70.0,
                delivery_method: DeliveryMethod::Delivery,
                shipping_address: None,
                distance_km: Some(0.4),
            })
            .await
            .expect("insert order");
        self.storage
            .set_tracking_id(order.id, tracking_id)
            .await
            .expect("set tracking id");
        self.order(order.id).await
    }

    pub async fn order(&self, id: ModelId) -> Order {
        self.storage
            .get_order(id)
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn stock(&self, id: ModelId) -> (i32, ProductStatus) {
        let product = self.catalog.get(id).await.expect("product exists");
        (product.stock_quantity, product.status)
    }
}
