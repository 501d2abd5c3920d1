use std::{sync::Arc, time::Duration};

use tracing::{debug, info};

use crate::{
    cache::TtlCache,
    error::{Result, StoreError},
    model::{ModelId, Product, ProductQuery, ProductStatus},
    storage::ProductStorage,
};

/// Product reads for the storefront, served through a TTL cache keyed by
/// the normalized query. Every write goes through here and clears it.
pub struct ProductCatalog {
    storage: Arc<dyn ProductStorage>,
    listings: TtlCache<ProductQuery, Arc<Vec<Product>>>,
}

impl ProductCatalog {
    pub fn new(storage: Arc<dyn ProductStorage>, ttl: Duration) -> Self {
        info!(ttl_secs = ttl.as_secs(), "Initializing product catalog");
        Self {
            storage,
            listings: TtlCache::new(ttl),
        }
    }

    pub async fn list(&self, query: &ProductQuery) -> Result<Arc<Vec<Product>>> {
        let key = query.normalized();
        self.listings
            .get_or_try_insert_with(key.clone(), || async {
                debug!(query = ?key, "Catalog cache miss");
                let products = self.storage.list_products(&key).await?;
                Ok::<_, StoreError>(Arc::new(products))
            })
            .await
    }

    pub async fn get(&self, id: ModelId) -> Result<Product> {
        self.storage
            .get_product(id)
            .await?
            .ok_or(StoreError::ProductNotFound(id))
    }

    pub async fn upsert(&self, product: Product) -> Result<Product> {
        if product.name.trim().is_empty() {
            return Err(StoreError::invalid("product name is required"));
        }
        if !product.price.is_finite() || product.price < 0.0 {
            return Err(StoreError::invalid(format!("invalid price {}", product.price)));
        }
        if product.stock_quantity < 0 {
            return Err(StoreError::invalid("stock quantity cannot be negative"));
        }

        let saved = self.storage.upsert_product(product).await?;
        self.invalidate();
        Ok(saved)
    }

    /// Admin stock edit. Zero stock marks an active product out of stock and
    /// restocking an out-of-stock product makes it active again;
    /// discontinued products keep their status.
    pub async fn set_stock(&self, id: ModelId, stock_quantity: i32) -> Result<Product> {
        if stock_quantity < 0 {
            return Err(StoreError::invalid("stock quantity cannot be negative"));
        }
        let current = self.get(id).await?;
        let status = match (current.status, stock_quantity) {
            (ProductStatus::Active, 0) => ProductStatus::OutOfStock,
            (ProductStatus::OutOfStock, qty) if qty > 0 => ProductStatus::Active,
            (status, _) => status,
        };

        let updated = self
            .storage
            .set_stock(id, stock_quantity, status)
            .await?
            .ok_or(StoreError::ProductNotFound(id))?;
        self.invalidate();
        Ok(updated)
    }

    pub fn invalidate(&self) {
        self.listings.invalidate_all();
    }

    pub fn cached_listings(&self) -> usize {
        self.listings.len()
    }
}
