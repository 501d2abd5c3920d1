use clap::Parser;
use std::{error::Error, sync::Arc};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use http::header;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;
use common::config::{BackendConfig, Config};
use crate::{
    catalog::ProductCatalog,
    checkout::{CheckoutRequest, CheckoutService},
    delivery::{CustomerLocation, DeliveryCalculator},
    error::StoreError,
    model::{DeliveryMethod, ModelId, ProductQuery},
    reconciler::{AdminAction, PaymentReconciler},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to config file
    #[arg(short, long, default_value = "target/debug/config/total_config.yaml")]
    pub config: String,
}

pub fn initialize_executable() -> Result<Config, Box<dyn Error + Send + Sync>> {
    match std::env::current_dir() {
        Ok(dir) => println!("Current directory: {:?}", dir),
        Err(e) => eprintln!("Failed to get current directory: {}", e),
    }

    let args = Args::parse();
    println!("Loading config from: {}", args.config);
    let config = Config::load(&args.config)?;
    println!("Loaded config for project: {}", config.common.project_name);

    Ok(config)
}

/// `RUST_LOG` wins over the configured level when set.
pub fn initialize_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        eprintln!("Tracing subscriber already initialized");
    }
}

pub fn install_metrics_recorder() -> Result<PrometheusHandle, Box<dyn Error + Send + Sync>> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

#[derive(Clone)]
pub struct AppState {
    catalog: Arc<ProductCatalog>,
    delivery: DeliveryCalculator,
    checkout: Arc<CheckoutService>,
    reconciler: Arc<PaymentReconciler>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        catalog: Arc<ProductCatalog>,
        delivery: DeliveryCalculator,
        checkout: Arc<CheckoutService>,
        reconciler: Arc<PaymentReconciler>,
    ) -> Self {
        Self {
            catalog,
            delivery,
            checkout,
            reconciler,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .route("/api/products", get(list_products))
        .route("/api/products/{id}", get(get_product))
        .route("/api/delivery/quote", post(quote_delivery))
        .route("/api/checkout", post(checkout))
        .route("/api/payments/ipn", get(payment_notification_get).post(payment_notification_post))
        .route("/api/admin/orders/{id}/sync", post(sync_order))
        .route("/api/admin/orders/{id}/payment", post(admin_payment_action))
        .route("/api/admin/products/{id}/stock", put(set_product_stock))
        .with_state(state)
}

pub async fn run_backend(
    config: BackendConfig,
    state: AppState,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let cors = if config.allowed_origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins = config
            .allowed_origins
            .iter()
            .map(|origin| origin.parse::<header::HeaderValue>())
            .collect::<Result<Vec<_>, _>>()?;
        CorsLayer::new().allow_origin(origins)
    };

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors.allow_methods(Any).allow_headers(Any));

    tracing::info!("Starting storefront backend at {}", config.server_address);
    let listener = tokio::net::TcpListener::bind(&config.server_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn status_for(error: &StoreError) -> StatusCode {
    match error {
        StoreError::ProductNotFound(_) | StoreError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        StoreError::DuplicateOrderNumber(_) => StatusCode::CONFLICT,
        StoreError::LocationUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        StoreError::Gateway(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(error: StoreError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!(error = %error, "Request failed");
    } else {
        tracing::warn!(error = %error, "Request rejected");
    }
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

fn respond<T: Serialize>(result: Result<T, StoreError>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK").into_response()
}

pub async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Response {
    respond(state.catalog.list(&query).await.map(|products| products.as_ref().clone()))
}

pub async fn get_product(State(state): State<AppState>, Path(id): Path<ModelId>) -> Response {
    respond(state.catalog.get(id).await)
}

#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    #[serde(default)]
    pub location: Option<CustomerLocation>,
    pub subtotal: f64,
    #[serde(default = "default_delivery_method")]
    pub delivery_method: DeliveryMethod,
}

fn default_delivery_method() -> DeliveryMethod {
    DeliveryMethod::Delivery
}

pub async fn quote_delivery(
    State(state): State<AppState>,
    Json(request): Json<QuoteRequest>,
) -> Response {
    if !request.subtotal.is_finite() || request.subtotal < 0.0 {
        return error_response(StoreError::invalid(format!("invalid subtotal {}", request.subtotal)));
    }
    respond(
        state
            .delivery
            .quote(request.location.as_ref(), request.subtotal, request.delivery_method)
            .await,
    )
}

pub async fn checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Response {
    tracing::info!(items = request.items.len(), method = %request.delivery_method, "Processing checkout");
    respond(state.checkout.checkout(request).await)
}

/// Query and body shape of the gateway's instant payment notification.
#[derive(Debug, Deserialize)]
pub struct PaymentNotification {
    #[serde(rename = "OrderTrackingId")]
    pub order_tracking_id: String,
    #[serde(rename = "OrderMerchantReference", default)]
    pub order_merchant_reference: Option<String>,
    #[serde(rename = "OrderNotificationType", default)]
    pub order_notification_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAck {
    pub order_notification_type: String,
    pub order_tracking_id: String,
    pub order_merchant_reference: String,
    pub status: u16,
}

async fn acknowledge(state: AppState, notification: PaymentNotification) -> Response {
    let result = state
        .reconciler
        .handle_notification(
            &notification.order_tracking_id,
            notification.order_merchant_reference.as_deref(),
        )
        .await;

    // The gateway retries notifications acknowledged with a non-200 status.
    let status = match &result {
        Ok(_) => 200,
        Err(e) => {
            tracing::error!(
                tracking_id = %notification.order_tracking_id,
                error = %e,
                "Failed to process payment notification"
            );
            500
        }
    };

    let ack = NotificationAck {
        order_notification_type: notification
            .order_notification_type
            .unwrap_or_else(|| "IPNCHANGE".to_string()),
        order_tracking_id: notification.order_tracking_id,
        order_merchant_reference: notification.order_merchant_reference.unwrap_or_default(),
        status,
    };
    (StatusCode::OK, Json(ack)).into_response()
}

pub async fn payment_notification_get(
    State(state): State<AppState>,
    Query(notification): Query<PaymentNotification>,
) -> Response {
    acknowledge(state, notification).await
}

pub async fn payment_notification_post(
    State(state): State<AppState>,
    Json(notification): Json<PaymentNotification>,
) -> Response {
    acknowledge(state, notification).await
}

pub async fn sync_order(State(state): State<AppState>, Path(id): Path<ModelId>) -> Response {
    respond(state.reconciler.sync_order(id).await)
}

#[derive(Debug, Deserialize)]
pub struct AdminPaymentRequest {
    pub action: AdminAction,
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn admin_payment_action(
    State(state): State<AppState>,
    Path(id): Path<ModelId>,
    Json(request): Json<AdminPaymentRequest>,
) -> Response {
    tracing::info!(order_id = id, action = %request.action, "Applying admin payment action");
    respond(
        state
            .reconciler
            .apply_admin_action(id, request.action, request.note)
            .await,
    )
}

#[derive(Debug, Deserialize)]
pub struct StockRequest {
    pub stock_quantity: i32,
}

pub async fn set_product_stock(
    State(state): State<AppState>,
    Path(id): Path<ModelId>,
    Json(request): Json<StockRequest>,
) -> Response {
    respond(state.catalog.set_stock(id, request.stock_quantity).await)
}
