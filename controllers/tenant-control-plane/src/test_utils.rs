//! Test utilities for unit testing resources and the driver
//!
//! In-memory stand-ins for the management cluster secrets, DataStore status
//! and the tenant cluster, plus helpers for building tenants.

use crate::addons::AddonConfiguration;
use crate::cluster::{AddonError, Manifest, ObjectRef, TenantCluster, TenantClusterFactory};
use crate::error::ControllerError;
use crate::secrets::{SecretData, SecretStore};
use crate::usage::{DataStoreStatusStore, UsedBy};
use crds::{TenantControlPlane, TenantControlPlaneSpec, TenantControlPlaneStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Helper to create a test TenantControlPlane without status
pub fn create_test_tenant(name: &str, namespace: &str) -> TenantControlPlane {
    TenantControlPlane {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("{namespace}-{name}-uid")),
            ..Default::default()
        },
        spec: TenantControlPlaneSpec {
            data_store: Some("default".to_string()),
            ..Default::default()
        },
        status: None,
    }
}

/// Helper to create a test TenantControlPlane whose datastore config was recorded
pub fn create_test_tenant_with_storage(name: &str, namespace: &str, config_checksum: &str) -> TenantControlPlane {
    let mut tenant = create_test_tenant(name, namespace);
    let mut status = TenantControlPlaneStatus::default();
    status.storage.driver = "PostgreSQL".to_string();
    status.storage.data_store_name = "default".to_string();
    status.storage.config.secret_name = format!("{name}-datastore-config");
    status.storage.config.checksum = config_checksum.to_string();
    status.kubeconfig.admin.secret_name = format!("{name}-admin-kubeconfig");
    tenant.status = Some(status);
    tenant
}

/// Credentials secret payload for a schema/user pair
pub fn credentials(schema: &str, user: &str, password: &str) -> SecretData {
    SecretData::from([
        ("DB_SCHEMA".to_string(), schema.to_string()),
        ("DB_USER".to_string(), user.to_string()),
        ("DB_PASSWORD".to_string(), password.to_string()),
    ])
}

pub fn test_addon_configuration() -> AddonConfiguration {
    AddonConfiguration {
        image: "registry.k8s.io/test:v1".to_string(),
        kubernetes_version: "v1.30.2".to_string(),
        cluster_domain: "cluster.local".to_string(),
        dns_service_ip: "10.96.0.10".to_string(),
        pod_cidr: "10.244.0.0/16".to_string(),
        control_plane_endpoint: None,
    }
}

/// A serde error standing in for any failure of the tenant API server
pub fn injected_error() -> AddonError {
    AddonError::Manifest(serde_json::from_str::<serde_json::Value>("{").unwrap_err())
}

#[derive(Default)]
struct ClusterState {
    objects: HashSet<ObjectRef>,
    fail_apply: bool,
    fail_delete: bool,
}

/// In-memory tenant cluster
#[derive(Clone, Default)]
pub struct MockTenantCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MockTenantCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.state.lock().unwrap().objects.contains(object)
    }

    pub fn fail_apply(&self, fail: bool) {
        self.state.lock().unwrap().fail_apply = fail;
    }

    pub fn fail_delete(&self, fail: bool) {
        self.state.lock().unwrap().fail_delete = fail;
    }
}

#[async_trait::async_trait]
impl TenantCluster for MockTenantCluster {
    async fn apply(&self, manifest: &Manifest) -> Result<(), AddonError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_apply {
            return Err(injected_error());
        }
        state.objects.insert(manifest.object_ref());
        Ok(())
    }

    async fn delete(&self, object: &ObjectRef) -> Result<(), AddonError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete {
            return Err(injected_error());
        }
        if state.objects.remove(object) {
            Ok(())
        } else {
            Err(AddonError::NotFound(object.to_string()))
        }
    }
}

/// Hands out the same `MockTenantCluster` for every tenant
#[derive(Clone, Default)]
pub struct MockClusterFactory {
    cluster: MockTenantCluster,
    unavailable: Arc<Mutex<bool>>,
    connects: Arc<AtomicUsize>,
}

impl MockClusterFactory {
    pub fn new(cluster: MockTenantCluster) -> Self {
        Self {
            cluster,
            ..Default::default()
        }
    }

    /// Make `connect` fail as if the admin kubeconfig were missing
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TenantClusterFactory for MockClusterFactory {
    async fn connect(&self, _tenant: &TenantControlPlane) -> Result<Arc<dyn TenantCluster>, ControllerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if *self.unavailable.lock().unwrap() {
            return Err(ControllerError::DependencyUnavailable(
                "admin kubeconfig not yet generated".to_string(),
            ));
        }
        Ok(Arc::new(self.cluster.clone()))
    }
}

/// In-memory secret store
#[derive(Clone, Default)]
pub struct MockSecretStore {
    secrets: Arc<Mutex<HashMap<(String, String), SecretData>>>,
    owners: Arc<Mutex<HashMap<(String, String), Option<OwnerReference>>>>,
}

impl MockSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: &str, name: &str, data: SecretData) {
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), data);
    }

    pub fn data(&self, namespace: &str, name: &str) -> Option<SecretData> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn owner(&self, namespace: &str, name: &str) -> Option<OwnerReference> {
        self.owners
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .flatten()
    }

    pub fn remove(&self, namespace: &str, name: &str) {
        self.secrets
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn len(&self) -> usize {
        self.secrets.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl SecretStore for MockSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, ControllerError> {
        Ok(self.data(namespace, name))
    }

    async fn create(
        &self,
        namespace: &str,
        name: &str,
        data: SecretData,
        owner: Option<OwnerReference>,
    ) -> Result<(), ControllerError> {
        let key = (namespace.to_string(), name.to_string());
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(&key) {
            return Err(ControllerError::InvalidConfig(format!(
                "secret {namespace}/{name} already exists"
            )));
        }
        secrets.insert(key.clone(), data);
        self.owners.lock().unwrap().insert(key, owner);
        Ok(())
    }
}

#[derive(Default)]
struct UsageState {
    lists: HashMap<String, (Vec<String>, u64)>,
    interleaved: HashMap<String, String>,
    always_conflict: bool,
    writes: usize,
}

/// In-memory DataStore `usedBy` lists with resource versions
#[derive(Clone, Default)]
pub struct MockDataStoreStatusStore {
    state: Arc<Mutex<UsageState>>,
}

impl MockDataStoreStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, data_store: &str, tenants: &[&str]) {
        let tenants = tenants.iter().map(|t| t.to_string()).collect();
        self.state.lock().unwrap().lists.insert(data_store.to_string(), (tenants, 1));
    }

    pub fn tenants(&self, data_store: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .lists
            .get(data_store)
            .map(|(tenants, _)| tenants.clone())
            .unwrap_or_default()
    }

    /// Have another writer add `tenant` right before the next write to `data_store`
    pub fn interleave(&self, data_store: &str, tenant: &str) {
        self.state
            .lock()
            .unwrap()
            .interleaved
            .insert(data_store.to_string(), tenant.to_string());
    }

    pub fn always_conflict(&self, conflict: bool) {
        self.state.lock().unwrap().always_conflict = conflict;
    }

    /// Successful writes so far
    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes
    }
}

#[async_trait::async_trait]
impl DataStoreStatusStore for MockDataStoreStatusStore {
    async fn used_by(&self, data_store: &str) -> Result<Option<UsedBy>, ControllerError> {
        Ok(self.state.lock().unwrap().lists.get(data_store).map(|(tenants, version)| UsedBy {
            tenants: tenants.clone(),
            resource_version: Some(version.to_string()),
        }))
    }

    async fn write_used_by(&self, data_store: &str, used_by: &UsedBy) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        if state.always_conflict {
            return Err(ControllerError::Conflict(data_store.to_string()));
        }
        let other = state.interleaved.remove(data_store);
        let Some((tenants, version)) = state.lists.get_mut(data_store) else {
            return Err(ControllerError::DependencyUnavailable(format!("DataStore {data_store} not found")));
        };
        if let Some(other) = other {
            tenants.push(other);
            tenants.sort();
            *version += 1;
        }
        if used_by.resource_version != Some(version.to_string()) {
            return Err(ControllerError::Conflict(data_store.to_string()));
        }
        *tenants = used_by.tenants.clone();
        *version += 1;
        state.writes += 1;
        Ok(())
    }
}
