use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display as EnumDisplay, EnumString};

pub mod entities;

pub type ModelId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumDisplay, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProductStatus {
    Active,
    OutOfStock,
    Discontinued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumDisplay, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Statuses the fulfilment flow reaches only after payment was confirmed.
    pub fn is_past_processing(&self) -> bool {
        matches!(self, Self::Shipped | Self::Delivered | Self::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumDisplay, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumDisplay, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryMethod {
    Delivery,
    Pickup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ModelId,
    pub name: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub product_type: Option<String>,
    pub price: f64,
    pub stock_quantity: i32,
    pub status: ProductStatus,
    pub brand: Option<String>,
    pub volume: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_purchasable(&self, quantity: u32) -> bool {
        self.status == ProductStatus::Active
            && i64::from(self.stock_quantity) >= i64::from(quantity)
    }

    /// Stock after removing `quantity`, clamped at zero, and the status it implies.
    pub fn stock_after_sale(&self, quantity: u32) -> (i32, ProductStatus) {
        // Never above the current stock, so it fits back into i32.
        let remaining = (i64::from(self.stock_quantity) - i64::from(quantity)).max(0) as i32;
        let status = if remaining == 0 && self.status == ProductStatus::Active {
            ProductStatus::OutOfStock
        } else {
            self.status
        };
        (remaining, status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub street: String,
    pub city: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ModelId,
    pub name: String,
    pub price: f64,
    pub quantity: u32,
}

impl OrderItem {
    pub fn line_total(&self) -> f64 {
        self.price * self.quantity as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: ModelId,
    pub order_number: String,
    pub user_id: Option<String>,
    pub items: Vec<OrderItem>,
    pub subtotal: f64,
    pub delivery_fee: f64,
    pub total_amount: f64,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub delivery_method: DeliveryMethod,
    pub shipping_address: Option<ShippingAddress>,
    pub distance_km: Option<f64>,
    pub payment_tracking_id: Option<String>,
    pub inventory_reduced: bool,
    pub inventory_reduced_at: Option<DateTime<Utc>>,
    pub admin_note: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog filter; also the catalog cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductQuery {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub include_discontinued: bool,
}

impl ProductQuery {
    /// Trims and lowercases every text filter so equivalent queries share a cache entry.
    pub fn normalized(&self) -> Self {
        let clean = |value: &Option<String>| {
            value
                .as_deref()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
        };
        Self {
            category: clean(&self.category),
            subcategory: clean(&self.subcategory),
            search: clean(&self.search),
            include_discontinued: self.include_discontinued,
        }
    }

    /// Expects a [`normalized`](Self::normalized) query.
    pub fn matches(&self, product: &Product) -> bool {
        if !self.include_discontinued && product.status == ProductStatus::Discontinued {
            return false;
        }
        if let Some(category) = &self.category {
            if product.category.to_lowercase() != *category {
                return false;
            }
        }
        if let Some(subcategory) = &self.subcategory {
            if product.subcategory.as_deref().map(str::to_lowercase).as_ref() != Some(subcategory) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let haystacks = [
                Some(product.name.as_str()),
                product.brand.as_deref(),
                product.description.as_deref(),
            ];
            if !haystacks
                .iter()
                .flatten()
                .any(|text| text.to_lowercase().contains(search.as_str()))
            {
                return false;
            }
        }
        true
    }
}

/// An order as checkout hands it to storage, before an id is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub order_number: String,
    pub user_id: Option<String>,
    pub items: Vec<OrderItem>,
    pub subtotal: f64,
    pub delivery_fee: f64,
    pub total_amount: f64,
    pub delivery_method: DeliveryMethod,
    pub shipping_address: Option<ShippingAddress>,
    pub distance_km: Option<f64>,
}

/// Fields the reconciler writes back after a status decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentUpdate {
    pub payment_status: PaymentStatus,
    pub status: OrderStatus,
    pub admin_note: Option<String>,
    pub synced_at: DateTime<Utc>,
}

/// Builds `ORD-<yyyymmdd>-<6 hex>` from the creation time and a disambiguator.
pub fn format_order_number(created_at: DateTime<Utc>, seed: u64) -> String {
    format!("ORD-{}-{:06X}", created_at.format("%Y%m%d"), seed & 0xFF_FFFF)
}
