//! `status.usedBy` bookkeeping on DataStores.
//!
//! Every write re-reads the DataStore and carries its `resourceVersion`, so
//! two tenants updating the same list concurrently cannot drop each other's
//! entry: the loser gets a conflict and retries against the fresh list.

use crate::error::ControllerError;
use crds::DataStore;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{debug, info};

const MAX_ATTEMPTS: usize = 5;

/// `usedBy` list of a DataStore as of `resource_version`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsedBy {
    pub tenants: Vec<String>,
    pub resource_version: Option<String>,
}

/// Reads and writes the `usedBy` list of DataStores
#[async_trait::async_trait]
pub trait DataStoreStatusStore: Send + Sync {
    /// Current list, `None` when the DataStore does not exist
    async fn used_by(&self, data_store: &str) -> Result<Option<UsedBy>, ControllerError>;

    /// Replace the list. Fails with `ControllerError::Conflict` when the
    /// DataStore changed since `used_by.resource_version`.
    async fn write_used_by(&self, data_store: &str, used_by: &UsedBy) -> Result<(), ControllerError>;
}

/// `DataStoreStatusStore` backed by the status subresource
pub struct KubeDataStoreStatusStore {
    client: Client,
}

impl KubeDataStoreStatusStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl DataStoreStatusStore for KubeDataStoreStatusStore {
    async fn used_by(&self, data_store: &str) -> Result<Option<UsedBy>, ControllerError> {
        let api: Api<DataStore> = Api::all(self.client.clone());
        Ok(api.get_opt(data_store).await?.map(|object| UsedBy {
            tenants: object.status.map(|status| status.used_by).unwrap_or_default(),
            resource_version: object.metadata.resource_version,
        }))
    }

    async fn write_used_by(&self, data_store: &str, used_by: &UsedBy) -> Result<(), ControllerError> {
        let api: Api<DataStore> = Api::all(self.client.clone());
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": used_by.resource_version },
            "status": { "usedBy": used_by.tenants },
        });
        match api
            .patch_status(data_store, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(ControllerError::Conflict(format!("DataStore {data_store} was modified")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps tenants listed on the DataStore they are provisioned on, and only there.
pub struct UsageTracker {
    store: Arc<dyn DataStoreStatusStore>,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn DataStoreStatusStore>) -> Self {
        Self { store }
    }

    /// List `tenant` on `data_store`
    pub async fn register(&self, data_store: &str, tenant: &str) -> Result<(), ControllerError> {
        self.update(data_store, |tenants| {
            if tenants.iter().any(|t| t == tenant) {
                return false;
            }
            tenants.push(tenant.to_string());
            tenants.sort();
            true
        })
        .await
    }

    /// Remove `tenant` from `data_store`
    pub async fn release(&self, data_store: &str, tenant: &str) -> Result<(), ControllerError> {
        self.update(data_store, |tenants| {
            let before = tenants.len();
            tenants.retain(|t| t != tenant);
            tenants.len() != before
        })
        .await
    }

    /// Release `tenant` from the DataStore recorded in its status when it no
    /// longer points there. `previous` is empty for never-provisioned tenants.
    pub async fn release_previous(
        &self,
        tenant: &str,
        previous: &str,
        current: Option<&str>,
    ) -> Result<(), ControllerError> {
        if previous.is_empty() || current == Some(previous) {
            return Ok(());
        }
        info!("TenantControlPlane {} moved off DataStore {}", tenant, previous);
        self.release(previous, tenant).await
    }

    /// Release `tenant` from every DataStore it may be listed on
    pub async fn forget(&self, tenant: &str, previous: &str, current: Option<&str>) -> Result<(), ControllerError> {
        if !previous.is_empty() {
            self.release(previous, tenant).await?;
        }
        match current {
            Some(name) if name != previous => self.release(name, tenant).await,
            _ => Ok(()),
        }
    }

    async fn update<F>(&self, data_store: &str, edit: F) -> Result<(), ControllerError>
    where
        F: Fn(&mut Vec<String>) -> bool + Send + Sync,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let Some(mut used_by) = self.store.used_by(data_store).await? else {
                debug!("DataStore {} not found, usedBy left alone", data_store);
                return Ok(());
            };
            if !edit(&mut used_by.tenants) {
                return Ok(());
            }
            match self.store.write_used_by(data_store, &used_by).await {
                Err(ControllerError::Conflict(reason)) => {
                    debug!("usedBy update attempt {} on {} conflicted: {}", attempt, data_store, reason);
                }
                other => return other,
            }
        }
        Err(ControllerError::Conflict(format!(
            "usedBy of DataStore {data_store} still conflicting after {MAX_ATTEMPTS} attempts"
        )))
    }
}
