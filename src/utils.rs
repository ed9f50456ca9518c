use anyhow::{Error, Result};
use serde_json::Value;
use tracing::{debug, info};

/// Tenant provisioning steps, run in order by the provision job processor.
/// Each one is a placeholder until the real integration lands; steps must
/// stay idempotent so a retried job can re-run the whole sequence.
const PROVISIONING_STEPS: [&str; 6] = [
    "subdomain_ssl",
    "branding",
    "widget_key",
    "crm_connection",
    "smoke_test",
    "notification_email",
];

pub async fn provision_tenant(payload: Value) -> Result<(), Error> {
    let tenant = payload
        .get("tenant_id")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    info!(tenant = %tenant, "Provisioning tenant");

    for step in PROVISIONING_STEPS {
        run_provisioning_step(&tenant, step).await?;
    }

    info!(tenant = %tenant, "Tenant provisioned");

    Ok(())
}

async fn run_provisioning_step(tenant: &str, step: &str) -> Result<(), Error> {
    debug!(tenant = %tenant, step = %step, "Provisioning step complete");
    Ok(())
}

/// Default processor for datastore write jobs. The datastore client itself
/// lives with the route layer; the worker acknowledges the payload here.
pub async fn record_lead(payload: Value) -> Result<(), Error> {
    info!(lead = %payload, "Lead recorded in tenant datastore");
    Ok(())
}
