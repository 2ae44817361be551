//! Main controller implementation.
//!
//! Owns the watcher task and the shared reconciler.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::watch_tenant_control_planes;
use crds::TenantControlPlane;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for TenantControlPlane management.
pub struct Controller {
    tenant_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Connects to the management cluster and starts watching.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing TenantControlPlane Controller");

        let client = Client::try_default().await?;
        let api: Api<TenantControlPlane> = match config.namespace.as_deref() {
            Some(namespace) => Api::namespaced(client.clone(), namespace),
            None => Api::all(client.clone()),
        };

        let reconciler = Arc::new(Reconciler::new(client, config));
        let tenant_watcher = tokio::spawn(watch_tenant_control_planes(api, reconciler));

        Ok(Self { tenant_watcher })
    }

    /// Runs the controller until the watcher exits.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("TenantControlPlane Controller running");

        self.tenant_watcher
            .await
            .map_err(|e| ControllerError::Watch(format!("TenantControlPlane watcher panicked: {}", e)))?
    }
}
