pub mod in_memory;
pub mod sea_orm_storage;

pub use in_memory::InMemoryStorage;
pub use sea_orm_storage::SeaOrmStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    model::{
        ModelId, NewOrder, Order, OrderItem, PaymentStatus, PaymentUpdate, Product, ProductQuery,
        ProductStatus,
    },
};

#[async_trait]
pub trait ProductStorage: Send + Sync {
    async fn get_product(&self, id: ModelId) -> Result<Option<Product>>;

    async fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>>;

    /// Inserts when `product.id == 0`, otherwise replaces the stored product.
    async fn upsert_product(&self, product: Product) -> Result<Product>;

    async fn set_stock(
        &self,
        id: ModelId,
        stock_quantity: i32,
        status: ProductStatus,
    ) -> Result<Option<Product>>;

    /// Removes `quantity` from stock in one step, clamped at zero; an active
    /// product that reaches zero becomes `out_of_stock`. `None` if the
    /// product does not exist.
    async fn decrement_stock(&self, id: ModelId, quantity: u32) -> Result<Option<Product>>;
}

#[async_trait]
pub trait OrderStorage: Send + Sync {
    /// Fails with `DuplicateOrderNumber` when the order number is taken.
    async fn insert_order(&self, order: NewOrder) -> Result<Order>;

    async fn get_order(&self, id: ModelId) -> Result<Option<Order>>;

    async fn find_by_tracking_id(&self, tracking_id: &str) -> Result<Option<Order>>;

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>>;

    /// Oldest first.
    async fn list_by_payment_status(&self, status: PaymentStatus, limit: u64) -> Result<Vec<Order>>;

    async fn set_tracking_id(&self, id: ModelId, tracking_id: &str) -> Result<()>;

    async fn apply_payment_update(&self, id: ModelId, update: PaymentUpdate) -> Result<Order>;

    /// Sets `inventory_reduced` if and only if it was unset, in one step.
    /// Returns whether this call was the one that set it, or `OrderNotFound`.
    async fn claim_inventory_reduction(&self, id: ModelId, at: DateTime<Utc>) -> Result<bool>;

    async fn set_admin_note(&self, id: ModelId, note: &str) -> Result<()>;
}

/// One-time stock decrement for a paid order.
#[async_trait]
pub trait InventoryStorage: Send + Sync {
    /// Claims the order's `inventory_reduced` flag and decrements every item
    /// as a single unit of work. Returns `None` if the flag was already set,
    /// otherwise the updated product per item (`None` for a product that no
    /// longer exists). On error nothing is written, so the order can be
    /// reduced again later.
    async fn reduce_order_inventory(
        &self,
        order_id: ModelId,
        items: &[OrderItem],
        at: DateTime<Utc>,
    ) -> Result<Option<Vec<Option<Product>>>>;
}
