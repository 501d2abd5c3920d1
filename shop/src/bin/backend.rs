use std::error::Error;

use storefront::executable_utils::{
    initialize_executable, initialize_tracing, install_metrics_recorder, run_backend,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    println!("Starting backend...");
    let config = initialize_executable()?;
    initialize_tracing(&config.backend.log_level);

    let services = shop::build_services(&config).await?;
    let state = services.app_state().with_metrics(install_metrics_recorder()?);
    run_backend(config.backend, state).await
}
