use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::PaymentConfig;
use metrics::histogram;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::{GatewayStatus, PaymentGateway, SubmitOrderRequest, SubmitOrderResponse, TransactionStatus};
use crate::error::{Result, StoreError};

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D").expect("static regex"));

/// Normalizes Kenyan phone numbers to the 2547XXXXXXXX form the gateway expects.
pub fn normalize_phone(raw: &str) -> String {
    let digits = NON_DIGITS.replace_all(raw, "");
    if let Some(local) = digits.strip_prefix('0') {
        format!("254{}", local)
    } else if digits.len() == 9 && (digits.starts_with('7') || digits.starts_with('1')) {
        format!("254{}", digits)
    } else {
        digits.into_owned()
    }
}

/// Tokens live five minutes; refresh a little early.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 30;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 300;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiError {
    fn describe(&self) -> Option<String> {
        let message = self.message.as_deref().filter(|m| !m.is_empty());
        let code = self.code.as_deref().filter(|c| !c.is_empty());
        match (message, code) {
            (None, None) => None,
            (message, code) => Some(format!(
                "{}{}{}",
                self.error_type.as_deref().map(|t| format!("{}: ", t)).unwrap_or_default(),
                message.unwrap_or("unknown error"),
                code.map(|c| format!(" ({})", c)).unwrap_or_default()
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    consumer_key: &'a str,
    consumer_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    #[serde(rename = "expiryDate")]
    expiry_date: Option<String>,
    error: Option<ApiError>,
}

#[derive(Debug, Serialize)]
struct BillingAddressBody<'a> {
    email_address: &'a str,
    phone_number: String,
    country_code: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    line_1: &'a str,
    city: &'a str,
}

#[derive(Debug, Serialize)]
struct SubmitOrderBody<'a> {
    id: &'a str,
    currency: &'a str,
    amount: f64,
    description: &'a str,
    callback_url: &'a str,
    notification_id: &'a str,
    billing_address: BillingAddressBody<'a>,
}

#[derive(Debug, Deserialize)]
struct SubmitOrderBodyResponse {
    order_tracking_id: Option<String>,
    merchant_reference: Option<String>,
    redirect_url: Option<String>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusBody {
    payment_method: Option<String>,
    amount: Option<f64>,
    confirmation_code: Option<String>,
    payment_status_description: Option<String>,
    status_code: Option<i64>,
    merchant_reference: Option<String>,
    currency: Option<String>,
    error: Option<ApiError>,
}

impl StatusBody {
    pub(crate) fn into_status(self) -> Result<TransactionStatus> {
        if let Some(message) = self.error.as_ref().and_then(ApiError::describe) {
            return Err(StoreError::Gateway(message));
        }
        Ok(TransactionStatus {
            status: GatewayStatus::resolve(
                self.payment_status_description.as_deref(),
                self.status_code,
            ),
            description: self.payment_status_description,
            confirmation_code: self.confirmation_code.filter(|c| !c.is_empty()),
            amount: self.amount,
            currency: self.currency,
            payment_method: self.payment_method.filter(|m| !m.is_empty()),
            merchant_reference: self.merchant_reference,
        })
    }
}

/// Client for the Pesapal v3 JSON API.
pub struct PesapalClient {
    client: reqwest::Client,
    base_url: Url,
    consumer_key: String,
    consumer_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl PesapalClient {
    pub fn new(config: &PaymentConfig) -> Result<Self> {
        if config.consumer_key.is_empty() || config.consumer_secret.is_empty() {
            return Err(StoreError::Config(
                "payment consumer key and secret must be set".to_string(),
            ));
        }
        let base_url = Url::parse(&format!("{}/", config.base_url.trim_end_matches('/')))
            .map_err(|e| StoreError::Config(format!("invalid payment url: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build payment client: {}", e)))?;

        info!(base_url = %base_url, "Initializing Pesapal client");
        Ok(Self {
            client,
            base_url,
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| StoreError::Config(format!("invalid endpoint {}: {}", path, e)))
    }

    async fn bearer_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > Utc::now() {
                return Ok(token.token.clone());
            }
        }

        debug!("Requesting new gateway token");
        let response: TokenResponse = self
            .send_json(
                self.client.post(self.endpoint("api/Auth/RequestToken")?).json(&TokenRequest {
                    consumer_key: &self.consumer_key,
                    consumer_secret: &self.consumer_secret,
                }),
                "request_token",
            )
            .await?;

        if let Some(message) = response.error.as_ref().and_then(ApiError::describe) {
            return Err(StoreError::Gateway(message));
        }
        let token = response
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StoreError::gateway("token response carried no token"))?;
        let expires_at = response
            .expiry_date
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));

        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        op: &'static str,
    ) -> Result<T> {
        let started = Instant::now();
        let result = request.header("Accept", "application/json").send().await;
        histogram!("storefront_gateway_seconds", "op" => op).record(started.elapsed().as_secs_f64());

        let response = result.map_err(|e| {
            warn!(op = op, error = %e, "Gateway request failed");
            StoreError::Gateway(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(op = op, status = %status, "Gateway returned an error status");
            return Err(StoreError::Gateway(format!("{} returned {}: {}", op, status, body)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Gateway(format!("{} returned an unreadable body: {}", op, e)))
    }
}

#[async_trait]
impl PaymentGateway for PesapalClient {
    async fn submit_order(&self, request: SubmitOrderRequest) -> Result<SubmitOrderResponse> {
        let token = self.bearer_token().await?;
        let body = SubmitOrderBody {
            id: &request.merchant_reference,
            currency: &request.currency,
            amount: request.amount,
            description: &request.description,
            callback_url: &request.callback_url,
            notification_id: &request.notification_id,
            billing_address: BillingAddressBody {
                email_address: &request.billing.email,
                phone_number: normalize_phone(&request.billing.phone),
                country_code: &request.billing.country_code,
                first_name: &request.billing.first_name,
                last_name: &request.billing.last_name,
                line_1: &request.billing.line_1,
                city: &request.billing.city,
            },
        };

        let response: SubmitOrderBodyResponse = self
            .send_json(
                self.client
                    .post(self.endpoint("api/Transactions/SubmitOrderRequest")?)
                    .bearer_auth(token)
                    .json(&body),
                "submit_order",
            )
            .await?;

        if let Some(message) = response.error.as_ref().and_then(ApiError::describe) {
            return Err(StoreError::Gateway(message));
        }

        match (response.order_tracking_id, response.redirect_url) {
            (Some(order_tracking_id), Some(redirect_url)) => {
                info!(
                    merchant_reference = %request.merchant_reference,
                    tracking_id = %order_tracking_id,
                    "Submitted order to gateway"
                );
                Ok(SubmitOrderResponse {
                    order_tracking_id,
                    merchant_reference: response
                        .merchant_reference
                        .unwrap_or(request.merchant_reference),
                    redirect_url,
                })
            }
            _ => Err(StoreError::gateway(
                "submit order response is missing tracking id or redirect url",
            )),
        }
    }

    async fn transaction_status(&self, tracking_id: &str) -> Result<TransactionStatus> {
        let token = self.bearer_token().await?;
        let mut url = self.endpoint("api/Transactions/GetTransactionStatus")?;
        url.query_pairs_mut().append_pair("orderTrackingId", tracking_id);

        let body: StatusBody = self
            .send_json(self.client.get(url).bearer_auth(token), "transaction_status")
            .await?;
        let status = body.into_status()?;
        debug!(tracking_id = %tracking_id, status = %status.status, "Fetched transaction status");
        Ok(status)
    }
}
