use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{InventoryStorage, OrderStorage, ProductStorage};
use crate::{
    error::{Result, StoreError},
    model::{
        ModelId, NewOrder, Order, OrderItem, OrderStatus, PaymentStatus, PaymentUpdate, Product,
        ProductQuery, ProductStatus,
    },
};

#[derive(Default)]
struct State {
    products: BTreeMap<ModelId, Product>,
    orders: BTreeMap<ModelId, Order>,
    next_product_id: ModelId,
    next_order_id: ModelId,
}

impl State {
    fn decrement(&mut self, id: ModelId, quantity: u32) -> Option<Product> {
        self.products.get_mut(&id).map(|product| {
            let (remaining, status) = product.stock_after_sale(quantity);
            product.stock_quantity = remaining;
            product.status = status;
            product.updated_at = Utc::now();
            product.clone()
        })
    }

    fn claim(&mut self, id: ModelId, at: DateTime<Utc>) -> Result<bool> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::OrderNotFound(id.to_string()))?;
        if order.inventory_reduced {
            return Ok(false);
        }
        order.inventory_reduced = true;
        order.inventory_reduced_at = Some(at);
        Ok(true)
    }
}

/// Storage kept in process memory. Backs the demo mode of the backend and
/// the test suites.
#[derive(Default)]
pub struct InMemoryStorage {
    state: RwLock<State>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_products(products: Vec<Product>) -> Result<Self> {
        let storage = Self::new();
        for product in products {
            storage.upsert_product(product).await?;
        }
        Ok(storage)
    }
}

#[async_trait]
impl ProductStorage for InMemoryStorage {
    async fn get_product(&self, id: ModelId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>> {
        let query = query.normalized();
        Ok(self
            .state
            .read()
            .await
            .products
            .values()
            .filter(|p| query.matches(p))
            .cloned()
            .collect())
    }

    async fn upsert_product(&self, mut product: Product) -> Result<Product> {
        let mut state = self.state.write().await;
        if product.id == 0 {
            state.next_product_id += 1;
            product.id = state.next_product_id;
        } else {
            state.next_product_id = state.next_product_id.max(product.id);
        }
        product.updated_at = Utc::now();
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn set_stock(
        &self,
        id: ModelId,
        stock_quantity: i32,
        status: ProductStatus,
    ) -> Result<Option<Product>> {
        let mut state = self.state.write().await;
        Ok(state.products.get_mut(&id).map(|product| {
            product.stock_quantity = stock_quantity;
            product.status = status;
            product.updated_at = Utc::now();
            product.clone()
        }))
    }

    async fn decrement_stock(&self, id: ModelId, quantity: u32) -> Result<Option<Product>> {
        Ok(self.state.write().await.decrement(id, quantity))
    }
}

#[async_trait]
impl OrderStorage for InMemoryStorage {
    async fn insert_order(&self, order: NewOrder) -> Result<Order> {
        let mut state = self.state.write().await;
        if state.orders.values().any(|o| o.order_number == order.order_number) {
            return Err(StoreError::DuplicateOrderNumber(order.order_number));
        }
        state.next_order_id += 1;
        let now = Utc::now();
        let stored = Order {
            id: state.next_order_id,
            order_number: order.order_number,
            user_id: order.user_id,
            items: order.items,
            subtotal: order.subtotal,
            delivery_fee: order.delivery_fee,
            total_amount: order.total_amount,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            delivery_method: order.delivery_method,
            shipping_address: order.shipping_address,
            distance_km: order.distance_km,
            payment_tracking_id: None,
            inventory_reduced: false,
            inventory_reduced_at: None,
            admin_note: None,
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_order(&self, id: ModelId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn find_by_tracking_id(&self, tracking_id: &str) -> Result<Option<Order>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|o| o.payment_tracking_id.as_deref() == Some(tracking_id))
            .cloned())
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn list_by_payment_status(&self, status: PaymentStatus, limit: u64) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.payment_status == status)
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id));
        orders.truncate(limit as usize);
        Ok(orders)
    }

    async fn set_tracking_id(&self, id: ModelId, tracking_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::OrderNotFound(id.to_string()))?;
        order.payment_tracking_id = Some(tracking_id.to_string());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn apply_payment_update(&self, id: ModelId, update: PaymentUpdate) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::OrderNotFound(id.to_string()))?;
        order.payment_status = update.payment_status;
        order.status = update.status;
        if update.admin_note.is_some() {
            order.admin_note = update.admin_note;
        }
        order.last_sync_at = Some(update.synced_at);
        order.updated_at = update.synced_at;
        Ok(order.clone())
    }

    async fn claim_inventory_reduction(&self, id: ModelId, at: DateTime<Utc>) -> Result<bool> {
        self.state.write().await.claim(id, at)
    }

    async fn set_admin_note(&self, id: ModelId, note: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::OrderNotFound(id.to_string()))?;
        order.admin_note = Some(note.to_string());
        order.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl InventoryStorage for InMemoryStorage {
    async fn reduce_order_inventory(
        &self,
        order_id: ModelId,
        items: &[OrderItem],
        at: DateTime<Utc>,
    ) -> Result<Option<Vec<Option<Product>>>> {
        let mut state = self.state.write().await;
        if !state.claim(order_id, at)? {
            return Ok(None);
        }
        Ok(Some(
            items
                .iter()
                .map(|item| state.decrement(item.product_id, item.quantity))
                .collect(),
        ))
    }
}
