use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    catalog::ProductCatalog,
    error::Result,
    model::{ModelId, Order, ProductStatus},
    storage::InventoryStorage,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockAdjustment {
    pub product_id: ModelId,
    pub quantity: u32,
    pub remaining: i32,
    pub status: ProductStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InventoryReport {
    pub already_reduced: bool,
    pub adjusted: Vec<StockAdjustment>,
    pub skipped: Vec<ModelId>,
}

pub struct InventoryService {
    storage: Arc<dyn InventoryStorage>,
    catalog: Option<Arc<ProductCatalog>>,
}

impl InventoryService {
    pub fn new(storage: Arc<dyn InventoryStorage>) -> Self {
        Self {
            storage,
            catalog: None,
        }
    }

    /// Cached listings are dropped whenever stock moves.
    pub fn with_catalog(mut self, catalog: Arc<ProductCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Takes the order's items out of stock, once per order.
    ///
    /// Claiming the `inventory_reduced` flag and moving stock happen together,
    /// so a second confirmation of the same order is a no-op and a failed
    /// attempt leaves the order free to be reduced on the next one. Products
    /// that no longer exist are skipped so the rest of the order still goes
    /// through.
    pub async fn reduce_for_order(&self, order: &Order) -> Result<InventoryReport> {
        let Some(products) = self
            .storage
            .reduce_order_inventory(order.id, &order.items, Utc::now())
            .await?
        else {
            info!(order_number = %order.order_number, "Inventory already reduced for order");
            return Ok(InventoryReport {
                already_reduced: true,
                ..Default::default()
            });
        };

        let mut report = InventoryReport::default();
        for (item, product) in order.items.iter().zip(products) {
            match product {
                Some(product) => {
                    if product.stock_quantity == 0 {
                        info!(product_id = product.id, name = %product.name, "Product sold out");
                    }
                    report.adjusted.push(StockAdjustment {
                        product_id: product.id,
                        quantity: item.quantity,
                        remaining: product.stock_quantity,
                        status: product.status,
                    });
                }
                None => {
                    warn!(
                        order_number = %order.order_number,
                        product_id = item.product_id,
                        "Product not found while reducing inventory, skipping"
                    );
                    report.skipped.push(item.product_id);
                }
            }
        }

        counter!("storefront_inventory_adjustments_total").increment(report.adjusted.len() as u64);
        if let Some(catalog) = &self.catalog {
            catalog.invalidate();
        }

        info!(
            order_number = %order.order_number,
            adjusted = report.adjusted.len(),
            skipped = report.skipped.len(),
            "Reduced inventory for order"
        );
        Ok(report)
    }
}
