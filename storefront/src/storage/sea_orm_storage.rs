use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection, DbBackend,
    DbErr, EntityTrait, IntoActiveModel, NotSet, QueryFilter, QueryOrder, QuerySelect, Schema,
    Set, SqlErr, Statement, TransactionTrait,
};
use tracing::{debug, info};

use super::{InventoryStorage, OrderStorage, ProductStorage};
use crate::{
    error::{Result, StoreError},
    model::{
        DeliveryMethod, ModelId, NewOrder, Order, OrderItem, OrderStatus, PaymentStatus,
        PaymentUpdate, Product, ProductQuery, ProductStatus, ShippingAddress,
        entities::{order, order_item, product},
    },
};

const DECREMENT_STOCK_SQL: &str = r#"
UPDATE products
SET stock_quantity = GREATEST(stock_quantity - $1, 0),
    status = CASE
        WHEN stock_quantity - $1 <= 0 AND status = 'active' THEN 'out_of_stock'
        ELSE status
    END,
    updated_at = NOW()
WHERE id = $2
"#;

#[derive(Clone)]
pub struct SeaOrmStorage {
    pub db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = Database::connect(database_url).await?;
        info!("Connected to storefront database");
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Creates the storefront tables if they do not exist yet.
    pub async fn create_schema(&self) -> Result<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        let statements = [
            schema.create_table_from_entity(product::Entity).if_not_exists().to_owned(),
            schema.create_table_from_entity(order::Entity).if_not_exists().to_owned(),
            schema.create_table_from_entity(order_item::Entity).if_not_exists().to_owned(),
        ];
        for statement in statements {
            self.db.execute(backend.build(&statement)).await?;
        }
        self.db
            .execute(Statement::from_string(
                DbBackend::Postgres,
                "create index if not exists idx_orders_payment_tracking_id on orders(payment_tracking_id)",
            ))
            .await?;
        Ok(())
    }

    async fn load_orders(&self, models: Vec<order::Model>) -> Result<Vec<Order>> {
        if models.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<i64> = models.iter().map(|m| m.id).collect();
        let mut items_by_order: HashMap<i64, Vec<order_item::Model>> = HashMap::new();
        for item in order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .order_by_asc(order_item::Column::Id)
            .all(&self.db)
            .await?
        {
            items_by_order.entry(item.order_id).or_default().push(item);
        }

        models
            .into_iter()
            .map(|m| {
                let items = items_by_order.remove(&m.id).unwrap_or_default();
                order_from_entity(m, items)
            })
            .collect()
    }

    async fn load_order(&self, model: Option<order::Model>) -> Result<Option<Order>> {
        match model {
            Some(model) => Ok(self.load_orders(vec![model]).await?.pop()),
            None => Ok(None),
        }
    }
}

fn parse_column<T: FromStr>(column: &str, raw: &str) -> Result<T> {
    T::from_str(raw)
        .map_err(|_| StoreError::Database(DbErr::Type(format!("unexpected {} value '{}'", column, raw))))
}

fn quantity_param(quantity: u32) -> Result<i32> {
    i32::try_from(quantity)
        .map_err(|_| StoreError::invalid(format!("quantity {} is out of range", quantity)))
}

async fn decrement_in<C: ConnectionTrait>(conn: &C, id: ModelId, quantity: u32) -> Result<Option<Product>> {
    let result = conn
        .execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            DECREMENT_STOCK_SQL,
            [quantity_param(quantity)?.into(), id.into()],
        ))
        .await?;
    if result.rows_affected() == 0 {
        return Ok(None);
    }
    debug!(product_id = id, quantity = quantity, "Decremented stock");
    product::Entity::find_by_id(id)
        .one(conn)
        .await?
        .map(product_from_entity)
        .transpose()
}

async fn claim_in<C: ConnectionTrait>(conn: &C, id: ModelId, at: DateTime<Utc>) -> Result<bool> {
    let result = order::Entity::update_many()
        .col_expr(order::Column::InventoryReduced, Expr::value(true))
        .col_expr(order::Column::InventoryReducedAt, Expr::value(at))
        .col_expr(order::Column::UpdatedAt, Expr::value(at))
        .filter(order::Column::Id.eq(id))
        .filter(order::Column::InventoryReduced.eq(false))
        .exec(conn)
        .await?;
    if result.rows_affected == 1 {
        return Ok(true);
    }
    match order::Entity::find_by_id(id).one(conn).await? {
        Some(_) => Ok(false),
        None => Err(StoreError::OrderNotFound(id.to_string())),
    }
}

fn product_from_entity(m: product::Model) -> Result<Product> {
    Ok(Product {
        id: m.id,
        name: m.name,
        category: m.category,
        subcategory: m.subcategory,
        product_type: m.product_type,
        price: m.price,
        stock_quantity: m.stock_quantity,
        status: parse_column::<ProductStatus>("products.status", &m.status)?,
        brand: m.brand,
        volume: m.volume,
        description: m.description,
        image_url: m.image_url,
        created_at: m.created_at,
        updated_at: m.updated_at,
    })
}

fn order_from_entity(m: order::Model, items: Vec<order_item::Model>) -> Result<Order> {
    let shipping_address = m
        .shipping_address
        .map(serde_json::from_value::<ShippingAddress>)
        .transpose()?;

    Ok(Order {
        id: m.id,
        order_number: m.order_number,
        user_id: m.user_id,
        items: items
            .into_iter()
            .map(|i| OrderItem {
                product_id: i.product_id,
                name: i.name,
                price: i.price,
                quantity: i.quantity.max(0) as u32,
            })
            .collect(),
        subtotal: m.subtotal,
        delivery_fee: m.delivery_fee,
        total_amount: m.total_amount,
        status: parse_column::<OrderStatus>("orders.status", &m.status)?,
        payment_status: parse_column::<PaymentStatus>("orders.payment_status", &m.payment_status)?,
        delivery_method: parse_column::<DeliveryMethod>("orders.delivery_method", &m.delivery_method)?,
        shipping_address,
        distance_km: m.distance_km,
        payment_tracking_id: m.payment_tracking_id,
        inventory_reduced: m.inventory_reduced,
        inventory_reduced_at: m.inventory_reduced_at,
        admin_note: m.admin_note,
        last_sync_at: m.last_sync_at,
        created_at: m.created_at,
        updated_at: m.updated_at,
    })
}

#[async_trait]
impl ProductStorage for SeaOrmStorage {
    async fn get_product(&self, id: ModelId) -> Result<Option<Product>> {
        product::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(product_from_entity)
            .transpose()
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>> {
        let query = query.normalized();
        let mut select = product::Entity::find().order_by_asc(product::Column::Name);
        if !query.include_discontinued {
            select = select.filter(product::Column::Status.ne(ProductStatus::Discontinued.to_string()));
        }

        let mut products = Vec::new();
        for model in select.all(&self.db).await? {
            let product = product_from_entity(model)?;
            if query.matches(&product) {
                products.push(product);
            }
        }
        Ok(products)
    }

    async fn upsert_product(&self, product: Product) -> Result<Product> {
        let now = Utc::now();
        let mut model = product::ActiveModel {
            id: if product.id == 0 { NotSet } else { Set(product.id) },
            name: Set(product.name),
            category: Set(product.category),
            subcategory: Set(product.subcategory),
            product_type: Set(product.product_type),
            price: Set(product.price),
            stock_quantity: Set(product.stock_quantity),
            status: Set(product.status.to_string()),
            brand: Set(product.brand),
            volume: Set(product.volume),
            description: Set(product.description),
            image_url: Set(product.image_url),
            created_at: Set(product.created_at),
            updated_at: Set(now),
        };

        let saved = if product.id == 0 {
            model.insert(&self.db).await?
        } else {
            // Keep the original creation time on updates.
            model.created_at = NotSet;
            model.update(&self.db).await?
        };
        product_from_entity(saved)
    }

    async fn set_stock(
        &self,
        id: ModelId,
        stock_quantity: i32,
        status: ProductStatus,
    ) -> Result<Option<Product>> {
        let Some(existing) = product::Entity::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        let mut model = existing.into_active_model();
        model.stock_quantity = Set(stock_quantity);
        model.status = Set(status.to_string());
        model.updated_at = Set(Utc::now());
        Ok(Some(product_from_entity(model.update(&self.db).await?)?))
    }

    async fn decrement_stock(&self, id: ModelId, quantity: u32) -> Result<Option<Product>> {
        let txn = self.db.begin().await?;
        let updated = decrement_in(&txn, id, quantity).await?;
        txn.commit().await?;
        Ok(updated)
    }
}

#[async_trait]
impl OrderStorage for SeaOrmStorage {
    async fn insert_order(&self, new_order: NewOrder) -> Result<Order> {
        let now = Utc::now();
        let shipping_address = new_order
            .shipping_address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let order_number = new_order.order_number.clone();
        let txn = self.db.begin().await?;
        let saved = order::ActiveModel {
            id: NotSet,
            order_number: Set(new_order.order_number),
            user_id: Set(new_order.user_id),
            subtotal: Set(new_order.subtotal),
            delivery_fee: Set(new_order.delivery_fee),
            total_amount: Set(new_order.total_amount),
            status: Set(OrderStatus::Pending.to_string()),
            payment_status: Set(PaymentStatus::Pending.to_string()),
            delivery_method: Set(new_order.delivery_method.to_string()),
            shipping_address: Set(shipping_address),
            distance_km: Set(new_order.distance_km),
            payment_tracking_id: Set(None),
            inventory_reduced: Set(false),
            inventory_reduced_at: Set(None),
            admin_note: Set(None),
            last_sync_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                StoreError::DuplicateOrderNumber(order_number.clone())
            }
            _ => StoreError::from(e),
        })?;

        let mut items = Vec::with_capacity(new_order.items.len());
        for item in new_order.items {
            let model = order_item::ActiveModel {
                id: NotSet,
                order_id: Set(saved.id),
                product_id: Set(item.product_id),
                name: Set(item.name),
                price: Set(item.price),
                quantity: Set(quantity_param(item.quantity)?),
            }
            .insert(&txn)
            .await?;
            items.push(model);
        }
        txn.commit().await?;

        order_from_entity(saved, items)
    }

    async fn get_order(&self, id: ModelId) -> Result<Option<Order>> {
        let model = order::Entity::find_by_id(id).one(&self.db).await?;
        self.load_order(model).await
    }

    async fn find_by_tracking_id(&self, tracking_id: &str) -> Result<Option<Order>> {
        let model = order::Entity::find()
            .filter(order::Column::PaymentTrackingId.eq(tracking_id))
            .one(&self.db)
            .await?;
        self.load_order(model).await
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<Order>> {
        let model = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&self.db)
            .await?;
        self.load_order(model).await
    }

    async fn list_by_payment_status(&self, status: PaymentStatus, limit: u64) -> Result<Vec<Order>> {
        let models = order::Entity::find()
            .filter(order::Column::PaymentStatus.eq(status.to_string()))
            .order_by_asc(order::Column::CreatedAt)
            .order_by_asc(order::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;
        self.load_orders(models).await
    }

    async fn set_tracking_id(&self, id: ModelId, tracking_id: &str) -> Result<()> {
        let result = order::Entity::update_many()
            .col_expr(order::Column::PaymentTrackingId, Expr::value(tracking_id.to_string()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(StoreError::OrderNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn apply_payment_update(&self, id: ModelId, update: PaymentUpdate) -> Result<Order> {
        let mut statement = order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(update.payment_status.to_string()))
            .col_expr(order::Column::Status, Expr::value(update.status.to_string()))
            .col_expr(order::Column::LastSyncAt, Expr::value(update.synced_at))
            .col_expr(order::Column::UpdatedAt, Expr::value(update.synced_at))
            .filter(order::Column::Id.eq(id));
        if let Some(note) = update.admin_note {
            statement = statement.col_expr(order::Column::AdminNote, Expr::value(note));
        }

        if statement.exec(&self.db).await?.rows_affected == 0 {
            return Err(StoreError::OrderNotFound(id.to_string()));
        }
        self.get_order(id)
            .await?
            .ok_or_else(|| StoreError::OrderNotFound(id.to_string()))
    }

    async fn claim_inventory_reduction(&self, id: ModelId, at: DateTime<Utc>) -> Result<bool> {
        claim_in(&self.db, id, at).await
    }

    async fn set_admin_note(&self, id: ModelId, note: &str) -> Result<()> {
        let result = order::Entity::update_many()
            .col_expr(order::Column::AdminNote, Expr::value(note.to_string()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(StoreError::OrderNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryStorage for SeaOrmStorage {
    async fn reduce_order_inventory(
        &self,
        order_id: ModelId,
        items: &[OrderItem],
        at: DateTime<Utc>,
    ) -> Result<Option<Vec<Option<Product>>>> {
        let txn = self.db.begin().await?;
        if !claim_in(&txn, order_id, at).await? {
            txn.rollback().await?;
            return Ok(None);
        }
        let mut products = Vec::with_capacity(items.len());
        for item in items {
            match decrement_in(&txn, item.product_id, item.quantity).await {
                Ok(product) => products.push(product),
                Err(e) => {
                    // Releases the claim along with any stock already moved.
                    txn.rollback().await?;
                    return Err(e);
                }
            }
        }
        txn.commit().await?;
        Ok(Some(products))
    }
}
