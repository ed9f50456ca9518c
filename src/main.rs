use std::sync::Arc;

use anyhow::{Error, Result};
use estimate_service::{api::run_api_server, config::Config, context::AppContext};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;
    let context = AppContext::new(config);

    run_api_server(Arc::clone(&context)).await?;

    context.shutdown().await;
    info!("Estimate service stopped");

    Ok(())
}
