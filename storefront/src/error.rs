use thiserror::Error;

use crate::model::ModelId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Could not determine location: {0}")]
    LocationUnavailable(String),

    #[error("Product {0} not found")]
    ProductNotFound(ModelId),

    #[error("Order {0} not found")]
    OrderNotFound(String),

    #[error("Order number {0} already exists")]
    DuplicateOrderNumber(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn gateway(message: impl Into<String>) -> Self {
        Self::Gateway(message.into())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        Self::Gateway(e.to_string())
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
