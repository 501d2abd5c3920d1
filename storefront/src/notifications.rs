use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    error::{Result, StoreError},
    model::{DeliveryMethod, Order},
};

/// Customer-facing side effects of a confirmed payment.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn payment_confirmed(&self, order: &Order) -> Result<()>;
}

/// Records confirmations in the service log only.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn payment_confirmed(&self, order: &Order) -> Result<()> {
        info!(
            order_number = %order.order_number,
            total = order.total_amount,
            email = order.shipping_address.as_ref().map(|a| a.email.as_str()).unwrap_or("-"),
            "Payment confirmed"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct PaymentConfirmedPayload<'a> {
    event: &'static str,
    order_number: &'a str,
    total_amount: f64,
    delivery_method: DeliveryMethod,
    customer_name: Option<&'a str>,
    customer_email: Option<&'a str>,
    customer_phone: Option<&'a str>,
    items: Vec<(&'a str, u32)>,
}

/// Posts confirmations to an external mailer/SMS hook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build notifier client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn payment_confirmed(&self, order: &Order) -> Result<()> {
        let address = order.shipping_address.as_ref();
        let payload = PaymentConfirmedPayload {
            event: "payment_confirmed",
            order_number: &order.order_number,
            total_amount: order.total_amount,
            delivery_method: order.delivery_method,
            customer_name: address.map(|a| a.full_name.as_str()),
            customer_email: address.map(|a| a.email.as_str()),
            customer_phone: address.map(|a| a.phone.as_str()),
            items: order.items.iter().map(|i| (i.name.as_str(), i.quantity)).collect(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| StoreError::Notification(format!("webhook unreachable: {}", e)))?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "Notification webhook rejected payload");
            return Err(StoreError::Notification(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
