use std::error::Error;

use storefront::executable_utils::{initialize_executable, initialize_tracing};

/// One pass over orders still waiting for payment; meant to run from cron.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    println!("Starting payment reconciliation sweep...");
    let config = initialize_executable()?;
    initialize_tracing(&config.reconcile.log_level);

    let services = shop::build_services(&config).await?;
    let summary = services
        .reconciler
        .sync_pending(config.reconcile.sweep_limit)
        .await?;

    tracing::info!(
        checked = summary.checked,
        paid = summary.paid,
        failed = summary.failed,
        pending = summary.pending,
        errors = summary.errors,
        "Reconciliation sweep done"
    );
    if summary.errors > 0 {
        return Err(anyhow::anyhow!("{} orders could not be synced", summary.errors).into());
    }
    Ok(())
}
