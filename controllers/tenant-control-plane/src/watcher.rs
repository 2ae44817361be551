//! Kubernetes resource watcher.
//!
//! Drives TenantControlPlane reconciliations with `kube_runtime::Controller`,
//! which handles reconnection, deduplication and per-object serialization.
//! Failing tenants are requeued with a per-tenant Fibonacci backoff; healthy
//! ones are revisited periodically to catch drift. A finalizer holds deleted
//! tenants until they are released from their DataStore.

use crate::error::ControllerError;
use crate::reconciler::{Reconciler, tenant_key};
use crds::TenantControlPlane;
use futures::StreamExt;
use kube::Api;
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::finalizer::{self, Event as Finalizer, finalizer};
use kube_runtime::{Controller, watcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const TENANT_FINALIZER: &str = "controlplane.microscaler.io/datastore-usage";

async fn reconcile(tenant: Arc<TenantControlPlane>, reconciler: Arc<Reconciler>) -> Result<Action, ControllerError> {
    let key = tenant_key(&tenant);
    debug!("Reconciling TenantControlPlane {}", key);

    let api = reconciler.tenant_api(&tenant);
    let ctx = reconciler.clone();
    let action = finalizer(&api, TENANT_FINALIZER, tenant, |event| async move {
        match event {
            Finalizer::Apply(tenant) => apply(tenant, ctx).await,
            Finalizer::Cleanup(tenant) => cleanup(tenant, ctx).await,
        }
    })
    .await
    .map_err(from_finalizer)?;

    reconciler.reset_backoff(&key);
    Ok(action)
}

async fn apply(tenant: Arc<TenantControlPlane>, reconciler: Arc<Reconciler>) -> Result<Action, ControllerError> {
    reconciler.reconcile_tenant(&tenant).await?;
    Ok(Action::requeue(reconciler.config().resync_interval))
}

async fn cleanup(tenant: Arc<TenantControlPlane>, reconciler: Arc<Reconciler>) -> Result<Action, ControllerError> {
    reconciler.release_tenant(&tenant).await?;
    Ok(Action::await_change())
}

fn from_finalizer(error: finalizer::Error<ControllerError>) -> ControllerError {
    match error {
        finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => e,
        finalizer::Error::AddFinalizer(e) | finalizer::Error::RemoveFinalizer(e) => ControllerError::Kube(e),
        other => ControllerError::Finalizer(other.to_string()),
    }
}

fn error_policy(tenant: Arc<TenantControlPlane>, error: &ControllerError, reconciler: Arc<Reconciler>) -> Action {
    let key = tenant_key(&tenant);
    let delay = reconciler.next_backoff(&key);
    match error {
        ControllerError::DependencyUnavailable(_) => {
            warn!("TenantControlPlane {} waiting on a dependency: {}, retrying in {:?}", key, error, delay);
        }
        _ => error!("Reconciliation error for TenantControlPlane {}: {}, retrying in {:?}", key, error, delay),
    }
    Action::requeue(delay)
}

/// Watches TenantControlPlane resources until the stream ends.
pub async fn watch_tenant_control_planes(
    api: Api<TenantControlPlane>,
    reconciler: Arc<Reconciler>,
) -> Result<(), ControllerError> {
    info!("Starting TenantControlPlane watcher");

    // Debounce batches the status patches we make ourselves
    let runtime_config = RuntimeConfig::default()
        .debounce(Duration::from_secs(5))
        .concurrency(3);

    Controller::new(api, watcher::Config::default())
        .with_config(runtime_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((object, _)) => debug!("Reconciled {}", object.name),
                Err(e) => error!("Controller error for TenantControlPlane: {}", e),
            }
        })
        .await;

    info!("TenantControlPlane watcher stopped");
    Ok(())
}
