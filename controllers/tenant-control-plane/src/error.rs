//! Controller-specific error types.
//!
//! Every variant except `DependencyUnavailable` and `UnsupportedAddon` wraps
//! the failure of an external system; all of them abort the current
//! reconciliation and are retried by the watcher's error policy.

use crate::cluster::AddonError;
use datastore_client::DataStoreError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the TenantControlPlane controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Opening a datastore connection failed
    #[error("Datastore error: {0}")]
    DataStore(#[from] DataStoreError),

    /// A required input (secret, kubeconfig, datastore) could not be read
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// No installer/remover registered for an add-on kind
    #[error("Unsupported addon: {0}")]
    UnsupportedAddon(String),

    /// Installing or removing an add-on in the tenant cluster failed
    #[error("Addon {addon}: {operation} failed: {source}")]
    ExternalApplyFailed {
        addon: String,
        operation: &'static str,
        #[source]
        source: AddonError,
    },

    /// A datastore tenancy operation failed
    #[error("Unable to {operation} {artifact}: {source}")]
    DatastoreOperationFailed {
        operation: &'static str,
        artifact: String,
        #[source]
        source: DataStoreError,
    },

    /// Fingerprint serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Optimistic concurrency check failed on a write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Adding or removing the tenant finalizer failed
    #[error("Finalizer error: {0}")]
    Finalizer(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
