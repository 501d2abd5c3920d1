use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::Utc;
use common::config::PaymentConfig;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{
    catalog::ProductCatalog,
    delivery::{CustomerLocation, DeliveryCalculator},
    error::{Result, StoreError},
    model::{
        DeliveryMethod, ModelId, NewOrder, OrderItem, ShippingAddress, format_order_number,
    },
    payment::{BillingDetails, PaymentGateway, SubmitOrderRequest},
    storage::OrderStorage,
};

const ORDER_NUMBER_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ModelId,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    pub items: Vec<CartLine>,
    pub delivery_method: DeliveryMethod,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
    #[serde(default)]
    pub location: Option<CustomerLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub order_id: ModelId,
    pub order_number: String,
    pub total_amount: f64,
    pub delivery_fee: f64,
    pub redirect_url: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    pub callback_url: String,
    pub notification_id: String,
}

impl From<&PaymentConfig> for CheckoutSettings {
    fn from(config: &PaymentConfig) -> Self {
        Self {
            currency: config.currency.clone(),
            callback_url: config.callback_url.clone(),
            notification_id: config.notification_id.clone(),
        }
    }
}

pub struct CheckoutService {
    catalog: Arc<ProductCatalog>,
    orders: Arc<dyn OrderStorage>,
    delivery: DeliveryCalculator,
    gateway: Arc<dyn PaymentGateway>,
    settings: CheckoutSettings,
    sequence: AtomicU64,
}

impl CheckoutService {
    pub fn new(
        catalog: Arc<ProductCatalog>,
        orders: Arc<dyn OrderStorage>,
        delivery: DeliveryCalculator,
        gateway: Arc<dyn PaymentGateway>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            catalog,
            orders,
            delivery,
            gateway,
            settings,
            sequence: AtomicU64::new(0),
        }
    }

    /// Prices the cart from the catalog, stores a pending order and opens a
    /// payment with the gateway.
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutResponse> {
        let items = self.price_items(&request.items).await?;
        let subtotal: f64 = items.iter().map(OrderItem::line_total).sum();

        let location = match request.delivery_method {
            DeliveryMethod::Pickup => None,
            DeliveryMethod::Delivery => {
                let address = request
                    .shipping_address
                    .as_ref()
                    .ok_or_else(|| StoreError::invalid("delivery requires a shipping address"))?;
                Some(
                    request
                        .location
                        .clone()
                        .unwrap_or_else(|| location_from_address(address)),
                )
            }
        };
        let quote = self
            .delivery
            .quote(location.as_ref(), subtotal, request.delivery_method)
            .await?;

        let mut new_order = NewOrder {
            order_number: String::new(),
            user_id: request.user_id.clone(),
            items,
            subtotal,
            delivery_fee: quote.fee,
            total_amount: subtotal + quote.fee,
            delivery_method: request.delivery_method,
            shipping_address: request.shipping_address.clone(),
            distance_km: match request.delivery_method {
                DeliveryMethod::Delivery => Some(quote.distance_km),
                DeliveryMethod::Pickup => None,
            },
        };
        let mut attempt = 1;
        let order = loop {
            new_order.order_number = self.next_order_number();
            match self.orders.insert_order(new_order.clone()).await {
                Err(StoreError::DuplicateOrderNumber(number)) if attempt < ORDER_NUMBER_ATTEMPTS => {
                    warn!(order_number = %number, attempt, "Order number taken, drawing another");
                    attempt += 1;
                }
                result => break result?,
            }
        };
        info!(
            order_number = %order.order_number,
            total = order.total_amount,
            "Created order"
        );

        let submission = SubmitOrderRequest {
            merchant_reference: order.order_number.clone(),
            amount: order.total_amount,
            currency: self.settings.currency.clone(),
            description: format!("Order {}", order.order_number),
            callback_url: self.settings.callback_url.clone(),
            notification_id: self.settings.notification_id.clone(),
            billing: billing_details(request.shipping_address.as_ref()),
        };

        let submitted = match self.gateway.submit_order(submission).await {
            Ok(submitted) => submitted,
            Err(e) => {
                error!(order_number = %order.order_number, error = %e, "Failed to submit order to gateway");
                self.orders
                    .set_admin_note(order.id, &format!("Payment submission failed: {}", e))
                    .await?;
                return Err(e);
            }
        };
        self.orders
            .set_tracking_id(order.id, &submitted.order_tracking_id)
            .await?;

        Ok(CheckoutResponse {
            order_id: order.id,
            order_number: order.order_number,
            total_amount: order.total_amount,
            delivery_fee: order.delivery_fee,
            redirect_url: submitted.redirect_url,
        })
    }

    fn next_order_number(&self) -> String {
        let now = Utc::now();
        let seed = u64::from(now.timestamp_subsec_nanos())
            ^ self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_mul(0x9E37);
        format_order_number(now, seed)
    }

    async fn price_items(&self, lines: &[CartLine]) -> Result<Vec<OrderItem>> {
        if lines.is_empty() {
            return Err(StoreError::invalid("cart is empty"));
        }

        // Repeated lines for one product are checked against stock together.
        let mut quantities: BTreeMap<ModelId, u32> = BTreeMap::new();
        for line in lines {
            if line.quantity == 0 {
                return Err(StoreError::invalid(format!(
                    "quantity for product {} must be positive",
                    line.product_id
                )));
            }
            let total = quantities.entry(line.product_id).or_default();
            *total = total.saturating_add(line.quantity);
        }

        let mut items = Vec::with_capacity(quantities.len());
        for (product_id, quantity) in quantities {
            if i32::try_from(quantity).is_err() {
                return Err(StoreError::invalid(format!(
                    "quantity {} for product {} is too large",
                    quantity, product_id
                )));
            }
            let product = self.catalog.get(product_id).await?;
            if !product.is_purchasable(quantity) {
                return Err(StoreError::invalid(format!(
                    "{} is not available in quantity {} ({} in stock, {})",
                    product.name, quantity, product.stock_quantity, product.status
                )));
            }
            items.push(OrderItem {
                product_id,
                name: product.name,
                price: product.price,
                quantity,
            });
        }
        Ok(items)
    }
}

fn location_from_address(address: &ShippingAddress) -> CustomerLocation {
    match (address.latitude, address.longitude) {
        (Some(latitude), Some(longitude)) => CustomerLocation::Coordinates { latitude, longitude },
        _ => CustomerLocation::ManualAddress {
            address: format!("{}, {}", address.street, address.city),
        },
    }
}

fn billing_details(address: Option<&ShippingAddress>) -> BillingDetails {
    let Some(address) = address else {
        return BillingDetails {
            country_code: "KE".to_string(),
            ..Default::default()
        };
    };
    let mut names = address.full_name.split_whitespace();
    let first_name = names.next().unwrap_or_default().to_string();
    let last_name = names.collect::<Vec<_>>().join(" ");

    BillingDetails {
        email: address.email.clone(),
        phone: address.phone.clone(),
        first_name,
        last_name,
        line_1: address.street.clone(),
        city: address.city.clone(),
        country_code: "KE".to_string(),
    }
}
