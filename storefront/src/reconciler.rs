use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use strum_macros::Display as EnumDisplay;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, StoreError},
    inventory::{InventoryReport, InventoryService},
    model::{ModelId, Order, OrderStatus, PaymentStatus, PaymentUpdate},
    notifications::Notifier,
    payment::{GatewayStatus, PaymentGateway},
    storage::OrderStorage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumDisplay)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdminAction {
    MarkPaid,
    MarkFailed,
    ResetToPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    Gateway(GatewayStatus),
    Admin(AdminAction),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileDecision {
    pub new_payment_status: PaymentStatus,
    pub new_order_status: OrderStatus,
    pub should_reduce_inventory: bool,
    pub should_notify: bool,
    pub note: String,
}

/// Maps a reported status onto the order.
///
/// Paid moves the order to processing (fulfilment stages already reached
/// are kept) and asks for the one-time inventory decrement if it has not
/// happened yet. Failed and every other gateway status put the order back
/// to pending; only an explicit failure marks the payment failed.
///
/// Nothing here ever gives stock back: a failure or a manual reset after a
/// confirmed payment leaves the earlier decrement in place.
pub fn decide(order: &Order, source: StatusSource) -> ReconcileDecision {
    let (payment_status, origin) = match source {
        StatusSource::Gateway(status) => {
            let payment_status = match status {
                GatewayStatus::Completed => PaymentStatus::Paid,
                GatewayStatus::Failed => PaymentStatus::Failed,
                GatewayStatus::Pending | GatewayStatus::Invalid | GatewayStatus::Reversed => {
                    PaymentStatus::Pending
                }
            };
            (payment_status, format!("Gateway reported {}", status))
        }
        StatusSource::Admin(action) => {
            let payment_status = match action {
                AdminAction::MarkPaid => PaymentStatus::Paid,
                AdminAction::MarkFailed => PaymentStatus::Failed,
                AdminAction::ResetToPending => PaymentStatus::Pending,
            };
            (payment_status, format!("Admin action {}", action))
        }
    };

    let order_status = match payment_status {
        PaymentStatus::Paid if order.status.is_past_processing() => order.status,
        PaymentStatus::Paid => OrderStatus::Processing,
        PaymentStatus::Failed | PaymentStatus::Pending => OrderStatus::Pending,
    };

    let paid = payment_status == PaymentStatus::Paid;
    let should_reduce_inventory = paid && !order.inventory_reduced;

    let note = if !paid && order.inventory_reduced {
        format!("{}; inventory reduced earlier is not restored", origin)
    } else if paid && order.inventory_reduced {
        format!("{}; inventory already reduced", origin)
    } else {
        origin
    };

    ReconcileDecision {
        new_payment_status: payment_status,
        new_order_status: order_status,
        should_reduce_inventory,
        should_notify: paid && order.payment_status != PaymentStatus::Paid,
        note,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub order: Order,
    pub decision: ReconcileDecision,
    pub inventory: Option<InventoryReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepSummary {
    pub checked: usize,
    pub paid: usize,
    pub failed: usize,
    pub pending: usize,
    pub errors: usize,
}

pub struct PaymentReconciler {
    orders: Arc<dyn OrderStorage>,
    gateway: Arc<dyn PaymentGateway>,
    inventory: Arc<InventoryService>,
    notifier: Arc<dyn Notifier>,
}

impl PaymentReconciler {
    pub fn new(
        orders: Arc<dyn OrderStorage>,
        gateway: Arc<dyn PaymentGateway>,
        inventory: Arc<InventoryService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        info!("Initializing payment reconciler");
        Self {
            orders,
            gateway,
            inventory,
            notifier,
        }
    }

    async fn load(&self, order_id: ModelId) -> Result<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))
    }

    /// Queries the gateway for the order's current payment state and applies it.
    pub async fn sync_order(&self, order_id: ModelId) -> Result<ReconcileOutcome> {
        let order = self.load(order_id).await?;
        let tracking_id = order.payment_tracking_id.clone().ok_or_else(|| {
            StoreError::invalid(format!(
                "order {} has no payment tracking id",
                order.order_number
            ))
        })?;

        let status = self.gateway.transaction_status(&tracking_id).await.map_err(|e| {
            error!(order_number = %order.order_number, error = %e, "Gateway status query failed");
            e
        })?;
        self.apply(order, StatusSource::Gateway(status.status), None).await
    }

    /// Entry point for the gateway's payment notification callback.
    pub async fn handle_notification(
        &self,
        tracking_id: &str,
        merchant_reference: Option<&str>,
    ) -> Result<ReconcileOutcome> {
        let order = match self.orders.find_by_tracking_id(tracking_id).await? {
            Some(order) => order,
            None => {
                let reference = merchant_reference
                    .ok_or_else(|| StoreError::OrderNotFound(tracking_id.to_string()))?;
                let order = self
                    .orders
                    .find_by_order_number(reference)
                    .await?
                    .ok_or_else(|| StoreError::OrderNotFound(reference.to_string()))?;
                // The checkout response may have been lost before the id was stored.
                self.orders.set_tracking_id(order.id, tracking_id).await?;
                self.load(order.id).await?
            }
        };

        let status = self.gateway.transaction_status(tracking_id).await?;
        self.apply(order, StatusSource::Gateway(status.status), None).await
    }

    pub async fn apply_admin_action(
        &self,
        order_id: ModelId,
        action: AdminAction,
        note: Option<String>,
    ) -> Result<ReconcileOutcome> {
        let order = self.load(order_id).await?;
        self.apply(order, StatusSource::Admin(action), note).await
    }

    /// Re-checks pending orders one after another. A failing order is
    /// logged and counted; it does not stop the sweep.
    pub async fn sync_pending(&self, limit: u64) -> Result<SweepSummary> {
        let pending = self
            .orders
            .list_by_payment_status(PaymentStatus::Pending, limit)
            .await?;

        let mut summary = SweepSummary::default();
        for order in pending.iter().filter(|o| o.payment_tracking_id.is_some()) {
            summary.checked += 1;
            match self.sync_order(order.id).await {
                Ok(outcome) => match outcome.decision.new_payment_status {
                    PaymentStatus::Paid => summary.paid += 1,
                    PaymentStatus::Failed => summary.failed += 1,
                    PaymentStatus::Pending => summary.pending += 1,
                },
                Err(e) => {
                    warn!(order_number = %order.order_number, error = %e, "Failed to sync order");
                    summary.errors += 1;
                }
            }
        }

        info!(?summary, "Finished pending payment sweep");
        Ok(summary)
    }

    async fn apply(
        &self,
        order: Order,
        source: StatusSource,
        admin_note: Option<String>,
    ) -> Result<ReconcileOutcome> {
        let decision = decide(&order, source);
        debug!(order_number = %order.order_number, ?decision, "Reconciling order");

        let note = match source {
            StatusSource::Admin(_) => Some(match admin_note {
                Some(text) if !text.trim().is_empty() => format!("{} ({})", text.trim(), decision.note),
                _ => decision.note.clone(),
            }),
            StatusSource::Gateway(_) => None,
        };

        let updated = self
            .orders
            .apply_payment_update(
                order.id,
                PaymentUpdate {
                    payment_status: decision.new_payment_status,
                    status: decision.new_order_status,
                    admin_note: note,
                    synced_at: Utc::now(),
                },
            )
            .await?;

        let inventory = if decision.should_reduce_inventory {
            Some(self.inventory.reduce_for_order(&updated).await)
        } else {
            None
        };

        // The order is already stored as paid, so a retry would not notify again.
        if decision.should_notify {
            if let Err(e) = self.notifier.payment_confirmed(&updated).await {
                warn!(order_number = %updated.order_number, error = %e, "Failed to send payment notification");
            }
        }

        let inventory = inventory.transpose().map_err(|e| {
            error!(order_number = %updated.order_number, error = %e, "Failed to reduce inventory");
            e
        })?;

        let source_label = match source {
            StatusSource::Gateway(_) => "gateway",
            StatusSource::Admin(_) => "admin",
        };
        counter!(
            "storefront_reconciliations_total",
            "source" => source_label,
            "payment_status" => decision.new_payment_status.to_string()
        )
        .increment(1);

        info!(
            order_number = %updated.order_number,
            payment_status = %updated.payment_status,
            status = %updated.status,
            "Reconciled order payment"
        );

        // Reload so the returned order carries the inventory flag.
        let order = if inventory.is_some() {
            self.load(updated.id).await?
        } else {
            updated
        };

        Ok(ReconcileOutcome {
            order,
            decision,
            inventory,
        })
    }
}
