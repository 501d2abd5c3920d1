use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::Display as EnumDisplay;

use crate::error::Result;

pub mod pesapal;

pub use pesapal::PesapalClient;

/// Payment state as reported by the gateway, after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumDisplay)]
pub enum GatewayStatus {
    Completed,
    Failed,
    Pending,
    Invalid,
    Reversed,
}

/// The single mapping from gateway vocabulary to [`GatewayStatus`]. Every
/// call site goes through here so casing differences ("COMPLETED",
/// "Completed") cannot drift apart.
const STATUS_TABLE: &[(&str, GatewayStatus)] = &[
    ("completed", GatewayStatus::Completed),
    ("complete", GatewayStatus::Completed),
    ("failed", GatewayStatus::Failed),
    ("invalid", GatewayStatus::Invalid),
    ("reversed", GatewayStatus::Reversed),
    ("pending", GatewayStatus::Pending),
];

impl GatewayStatus {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        STATUS_TABLE
            .iter()
            .find(|(name, _)| *name == normalized)
            .map(|(_, status)| *status)
            .unwrap_or(GatewayStatus::Pending)
    }

    /// Numeric `status_code` from the transaction status endpoint.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Invalid),
            1 => Some(Self::Completed),
            2 => Some(Self::Failed),
            3 => Some(Self::Reversed),
            _ => None,
        }
    }

    /// Prefers the description when it is recognized, falls back to the code.
    pub fn resolve(description: Option<&str>, code: Option<i64>) -> Self {
        let from_description = description.map(Self::parse);
        match (from_description, code.and_then(Self::from_code)) {
            (Some(status), _) if status != Self::Pending => status,
            (_, Some(status)) => status,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillingDetails {
    pub email: String,
    pub phone: String,
    pub first_name: String,
    pub last_name: String,
    pub line_1: String,
    pub city: String,
    pub country_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOrderRequest {
    pub merchant_reference: String,
    pub amount: f64,
    pub currency: String,
    pub description: String,
    pub callback_url: String,
    pub notification_id: String,
    pub billing: BillingDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOrderResponse {
    pub order_tracking_id: String,
    pub merchant_reference: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub status: GatewayStatus,
    pub description: Option<String>,
    pub confirmation_code: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub payment_method: Option<String>,
    pub merchant_reference: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn submit_order(&self, request: SubmitOrderRequest) -> Result<SubmitOrderResponse>;

    async fn transaction_status(&self, tracking_id: &str) -> Result<TransactionStatus>;
}
