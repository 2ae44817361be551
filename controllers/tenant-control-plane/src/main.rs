//! TenantControlPlane Controller
//!
//! Drives the resources a tenant control plane depends on towards the state
//! declared in its `TenantControlPlane`:
//! - the tenant schema, user and grant inside its `DataStore`
//! - the CoreDNS and kube-proxy add-ons inside the tenant cluster
//!
//! Drift is detected by comparing recorded fingerprints with the fingerprint
//! of the current configuration, and repaired idempotently.

mod addons;
mod backoff;
mod checksum;
mod cluster;
mod config;
mod controller;
mod driver;
mod error;
mod reconciler;
#[cfg(test)]
mod reconciler_test;
mod resources;
mod secrets;
#[cfg(test)]
mod test_utils;
mod usage;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting TenantControlPlane Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Datastore connect timeout: {:?}", config.datastore_connect_timeout);
    info!(
        "  Requeue backoff: {}m..{}m",
        config.requeue_min_minutes, config.requeue_max_minutes
    );

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
