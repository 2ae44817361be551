//! Reconciliation of TenantControlPlane resources.
//!
//! A reconciliation resolves the tenant's `DataStore`, opens a connection to
//! it and runs the dependent resources in order through the driver:
//! datastore config, datastore setup, CoreDNS, kube-proxy. The tenant status
//! is persisted after every resource that changed it, so work done before a
//! failure is not repeated on the next attempt. A tenant is listed in the
//! `usedBy` status of the DataStore it is provisioned on, and only that one.

use crate::addons::{AddonKind, AddonRegistry};
use crate::backoff::FibonacciBackoff;
use crate::cluster::{KubeconfigClusterFactory, TenantClusterFactory};
use crate::config::ControllerConfig;
use crate::driver;
use crate::error::ControllerError;
use crate::resources::addons::{AddonResource, desired_checksum};
use crate::resources::datastore_config::DataStoreConfig;
use crate::resources::datastore_setup::DataStoreSetup;
use crate::resources::Resource;
use crate::secrets::{KubeSecretStore, SecretStore};
use crate::usage::{KubeDataStoreStatusStore, UsageTracker};
use crds::{DataStore, SecretKeyReference, TenantControlPlane};
use datastore_client::{Connection, ConnectionConfig};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Persists the status of a tenant
#[async_trait::async_trait]
pub trait StatusWriter: Send + Sync {
    async fn write_status(&self, tenant: &TenantControlPlane) -> Result<(), ControllerError>;
}

/// `StatusWriter` merge-patching the status subresource
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn write_status(&self, tenant: &TenantControlPlane) -> Result<(), ControllerError> {
        let namespace = tenant.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<TenantControlPlane> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({ "status": tenant.status });
        api.patch_status(&tenant.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Run `resources` in order for `tenant`, persisting the status after each
/// one that changed it. Stops at the first error.
pub async fn run_resources(
    resources: &mut [Box<dyn Resource>],
    tenant: &mut TenantControlPlane,
    writer: &dyn StatusWriter,
) -> Result<(), ControllerError> {
    for resource in resources.iter_mut() {
        let outcome = driver::handle(&mut **resource, tenant)
            .await
            .inspect_err(|e| warn!("Resource {} of {} failed: {}", resource.name(), tenant.name_any(), e))?;
        if outcome.status_changed() {
            debug!("Persisting status of {} after {}", tenant.name_any(), resource.name());
            writer.write_status(tenant).await?;
        }
    }
    Ok(())
}

/// Backoff state for a tenant
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

/// Reconciles TenantControlPlane resources.
pub struct Reconciler {
    client: Client,
    secrets: Arc<dyn SecretStore>,
    clusters: Arc<dyn TenantClusterFactory>,
    status: Arc<dyn StatusWriter>,
    registry: AddonRegistry,
    usage: UsageTracker,
    config: ControllerConfig,
    /// Tenant key (namespace/name) -> BackoffState
    backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl Reconciler {
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        let secrets: Arc<dyn SecretStore> = Arc::new(KubeSecretStore::new(client.clone()));
        Self {
            clusters: Arc::new(KubeconfigClusterFactory::new(secrets.clone())),
            status: Arc::new(KubeStatusWriter::new(client.clone())),
            secrets,
            client: client.clone(),
            registry: AddonRegistry::builtin(),
            usage: UsageTracker::new(Arc::new(KubeDataStoreStatusStore::new(client.clone()))),
            config,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Reconciles a TenantControlPlane resource.
    ///
    /// This method:
    /// 1. Resolves the referenced DataStore and connects to it
    /// 2. Ensures the datastore config secret and the datastore setup
    /// 3. Installs or removes the declared add-ons
    ///
    /// The connection is closed whatever the outcome.
    pub async fn reconcile_tenant(&self, tenant: &TenantControlPlane) -> Result<(), ControllerError> {
        let key = tenant_key(tenant);
        info!("Reconciling TenantControlPlane {}", key);

        let previous = tenant.storage_status().data_store_name.clone();
        self.usage
            .release_previous(&key, &previous, tenant.spec.data_store.as_deref())
            .await?;

        let mut working = tenant.clone();
        let mut resources: Vec<Box<dyn Resource>> = Vec::new();

        let connection = match tenant.spec.data_store.as_deref() {
            Some(name) => {
                let data_store = self.data_store(name).await?;
                let driver = data_store.spec.driver.as_str();
                let connection: Arc<dyn Connection> = Arc::from(self.connect(&data_store).await?);
                resources.push(Box::new(DataStoreConfig::new(self.secrets.clone(), name, driver)));
                resources.push(Box::new(DataStoreSetup::new(
                    self.secrets.clone(),
                    connection.clone(),
                    driver,
                )));
                Some((data_store, connection))
            }
            None => {
                debug!("TenantControlPlane {} declares no datastore", key);
                None
            }
        };

        for kind in AddonKind::ALL {
            let mut addon = AddonResource::new(kind, &self.registry, self.clusters.clone())?;
            addon.set_config_checksum(desired_checksum(tenant, kind)?.unwrap_or_default());
            resources.push(Box::new(addon));
        }

        let result = run_resources(&mut resources, &mut working, self.status.as_ref()).await;

        if let Some((data_store, connection)) = connection {
            connection.close().await;
            if result.is_ok() {
                self.usage.register(&data_store.name_any(), &key).await?;
            }
        }

        result.inspect(|_| info!("TenantControlPlane {} reconciled", key))
    }

    async fn data_store(&self, name: &str) -> Result<DataStore, ControllerError> {
        let api: Api<DataStore> = Api::all(self.client.clone());
        api.get_opt(name)
            .await?
            .ok_or_else(|| ControllerError::DependencyUnavailable(format!("DataStore {name} not found")))
    }

    async fn connect(&self, data_store: &DataStore) -> Result<Box<dyn Connection>, ControllerError> {
        let name = data_store.name_any();
        let auth = data_store.spec.basic_auth.as_ref().ok_or_else(|| {
            ControllerError::DependencyUnavailable(format!("DataStore {name} has no basicAuth"))
        })?;

        let config = ConnectionConfig {
            driver: data_store.spec.driver.as_str().to_string(),
            endpoints: data_store.spec.endpoints.clone(),
            username: self.secret_value(&auth.username).await?,
            password: self.secret_value(&auth.password).await?,
            connect_timeout: self.config.datastore_connect_timeout,
        };
        let connection = datastore_client::connect(&config).await?;
        check_driver(data_store.spec.driver.as_str(), connection.as_ref())?;
        connection.check().await?;
        Ok(connection)
    }

    async fn secret_value(&self, reference: &SecretKeyReference) -> Result<String, ControllerError> {
        let data = self
            .secrets
            .get(&reference.namespace, &reference.name)
            .await?
            .ok_or_else(|| {
                ControllerError::DependencyUnavailable(format!(
                    "secret {}/{} not found",
                    reference.namespace, reference.name
                ))
            })?;
        data.get(&reference.key).cloned().ok_or_else(|| {
            ControllerError::DependencyUnavailable(format!(
                "secret {}/{} has no {} key",
                reference.namespace, reference.name, reference.key
            ))
        })
    }

    /// Drop a deleted tenant from the `usedBy` lists it appears in
    pub async fn release_tenant(&self, tenant: &TenantControlPlane) -> Result<(), ControllerError> {
        let key = tenant_key(tenant);
        info!("Releasing TenantControlPlane {}", key);
        self.usage
            .forget(
                &key,
                &tenant.storage_status().data_store_name,
                tenant.spec.data_store.as_deref(),
            )
            .await
    }

    /// Api for the namespace of `tenant`
    pub fn tenant_api(&self, tenant: &TenantControlPlane) -> Api<TenantControlPlane> {
        let namespace = tenant.namespace().unwrap_or_else(|| "default".to_string());
        Api::namespaced(self.client.clone(), &namespace)
    }

    /// Next requeue delay for a failing tenant
    pub fn next_backoff(&self, key: &str) -> Duration {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(key.to_string()).or_insert_with(|| BackoffState {
                    backoff: FibonacciBackoff::new(
                        self.config.requeue_min_minutes,
                        self.config.requeue_max_minutes,
                    ),
                    error_count: 0,
                });
                state.error_count += 1;
                debug!("TenantControlPlane {} failed {} time(s)", key, state.error_count);
                state.backoff.next_backoff()
            }
            Err(e) => {
                error!("Failed to lock backoff states: {}, using default backoff", e);
                Duration::from_secs(60)
            }
        }
    }

    /// Forget the failures of a tenant after a successful reconciliation
    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }
}

/// Refuse a connection opened for another backend than the DataStore declares
pub fn check_driver(expected: &str, connection: &dyn Connection) -> Result<(), ControllerError> {
    if connection.driver() != expected {
        return Err(ControllerError::InvalidConfig(format!(
            "DataStore declares driver {expected}, connection speaks {}",
            connection.driver()
        )));
    }
    Ok(())
}

/// `namespace/name` of a tenant
pub fn tenant_key(tenant: &TenantControlPlane) -> String {
    format!(
        "{}/{}",
        tenant.namespace().unwrap_or_else(|| "default".to_string()),
        tenant.name_any()
    )
}
