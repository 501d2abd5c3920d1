use serde::Deserialize;
use std::{error::Error, fs};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CommonConfig {
    pub project_name: String,
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendConfig {
    pub server_address: String,
    pub log_level: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_cache_ttl_secs")]
    pub catalog_cache_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReconcileConfig {
    pub log_level: String,
    #[serde(default = "default_sweep_limit")]
    pub sweep_limit: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TierConfig {
    pub max_distance_km: f64,
    pub fee: f64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeliveryConfig {
    pub store_latitude: f64,
    pub store_longitude: f64,
    pub tiers: Vec<TierConfig>,
    pub per_km_rate: f64,
    pub free_delivery_threshold: f64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PaymentConfig {
    pub base_url: String,
    #[serde(default)]
    pub consumer_key: String,
    #[serde(default)]
    pub consumer_secret: String,
    pub callback_url: String,
    pub notification_id: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GeocodingConfig {
    pub base_url: String,
    pub user_agent: String,
    #[serde(default)]
    pub country_codes: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotificationConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub common: CommonConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    pub delivery: DeliveryConfig,
    pub payment: PaymentConfig,
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_sweep_limit() -> u64 {
    100
}

fn default_currency() -> String {
    "KES".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

impl Config {
    pub fn load(config_path: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let contents = fs::read_to_string(config_path)?;
        let mut config = Self::from_yaml(&contents)?;
        config.apply_env_overrides();

        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let config = serde_yml::from_str(contents)?;
        Ok(config)
    }

    /// Secrets never live in the YAML files; `.env` or the process environment win.
    pub fn apply_env_overrides(&mut self) {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.common.database_url = url;
        }
        if let Ok(key) = std::env::var("PESAPAL_CONSUMER_KEY") {
            self.payment.consumer_key = key;
        }
        if let Ok(secret) = std::env::var("PESAPAL_CONSUMER_SECRET") {
            self.payment.consumer_secret = secret;
        }
        if let Ok(id) = std::env::var("PESAPAL_NOTIFICATION_ID") {
            self.payment.notification_id = id;
        }
    }
}
