use std::{error::Error, sync::Arc, time::Duration};

use chrono::Utc;
use common::config::Config;
use serde::Deserialize;
use storefront::{
    catalog::ProductCatalog,
    checkout::{CheckoutService, CheckoutSettings},
    delivery::{DeliveryCalculator, DeliverySettings},
    executable_utils::AppState,
    geocoding::NominatimGeocoder,
    inventory::InventoryService,
    model::{Product, ProductStatus},
    notifications::{Notifier, TracingNotifier, WebhookNotifier},
    payment::PesapalClient,
    reconciler::PaymentReconciler,
    storage::{InMemoryStorage, InventoryStorage, OrderStorage, ProductStorage, SeaOrmStorage},
};
use tracing::info;

/// `database_url` value that runs the shop on process memory with the demo catalog.
pub const IN_MEMORY_DATABASE_URL: &str = "memory://";

const SEED_PRODUCTS_YAML: &str = include_str!("../config/seed_products.yaml");

#[derive(Debug, Deserialize)]
struct SeedProduct {
    name: String,
    category: String,
    subcategory: Option<String>,
    #[serde(default)]
    product_type: Option<String>,
    price: f64,
    stock_quantity: i32,
    brand: Option<String>,
    volume: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Demo catalog bundled with the binary.
pub fn seed_products() -> Result<Vec<Product>, serde_yml::Error> {
    let seeds: Vec<SeedProduct> = serde_yml::from_str(SEED_PRODUCTS_YAML)?;
    let now = Utc::now();
    Ok(seeds
        .into_iter()
        .map(|seed| Product {
            id: 0,
            status: if seed.stock_quantity > 0 {
                ProductStatus::Active
            } else {
                ProductStatus::OutOfStock
            },
            name: seed.name,
            category: seed.category,
            subcategory: seed.subcategory,
            product_type: seed.product_type,
            price: seed.price,
            stock_quantity: seed.stock_quantity,
            brand: seed.brand,
            volume: seed.volume,
            description: seed.description,
            image_url: None,
            created_at: now,
            updated_at: now,
        })
        .collect())
}

pub struct Services {
    pub catalog: Arc<ProductCatalog>,
    pub delivery: DeliveryCalculator,
    pub checkout: Arc<CheckoutService>,
    pub reconciler: Arc<PaymentReconciler>,
}

impl Services {
    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.catalog.clone(),
            self.delivery.clone(),
            self.checkout.clone(),
            self.reconciler.clone(),
        )
    }
}

struct Storage {
    products: Arc<dyn ProductStorage>,
    orders: Arc<dyn OrderStorage>,
    inventory: Arc<dyn InventoryStorage>,
}

impl Storage {
    fn shared<S>(storage: Arc<S>) -> Self
    where
        S: ProductStorage + OrderStorage + InventoryStorage + 'static,
    {
        Self {
            products: storage.clone(),
            orders: storage.clone(),
            inventory: storage,
        }
    }
}

async fn connect_storage(database_url: &str) -> Result<Storage, Box<dyn Error + Send + Sync>> {
    if database_url == IN_MEMORY_DATABASE_URL {
        let storage = InMemoryStorage::with_products(seed_products()?).await?;
        info!("Using in-memory storage with the demo catalog");
        return Ok(Storage::shared(Arc::new(storage)));
    }

    let storage = SeaOrmStorage::new(database_url).await?;
    storage.create_schema().await?;
    Ok(Storage::shared(Arc::new(storage)))
}

/// Wires every storefront service from the loaded configuration.
pub async fn build_services(config: &Config) -> Result<Services, Box<dyn Error + Send + Sync>> {
    let Storage {
        products,
        orders,
        inventory,
    } = connect_storage(&config.common.database_url).await?;

    let catalog = Arc::new(ProductCatalog::new(
        products,
        Duration::from_secs(config.backend.catalog_cache_ttl_secs),
    ));
    let delivery = DeliveryCalculator::new(
        DeliverySettings::from_config(&config.delivery)?,
        Arc::new(NominatimGeocoder::new(&config.geocoding)?),
    );
    let gateway = Arc::new(PesapalClient::new(&config.payment)?);
    let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
        None => Arc::new(TracingNotifier),
    };

    let inventory = Arc::new(InventoryService::new(inventory).with_catalog(catalog.clone()));
    let checkout = Arc::new(CheckoutService::new(
        catalog.clone(),
        orders.clone(),
        delivery.clone(),
        gateway.clone(),
        CheckoutSettings::from(&config.payment),
    ));
    let reconciler = Arc::new(PaymentReconciler::new(orders, gateway, inventory, notifier));

    Ok(Services {
        catalog,
        delivery,
        checkout,
        reconciler,
    })
}
