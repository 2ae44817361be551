//! Access to a tenant's own cluster.
//!
//! Add-ons live inside the tenant cluster, not the management cluster. A
//! `TenantClusterFactory` turns the tenant admin kubeconfig into a
//! `TenantCluster` that add-on installers and removers operate on.

use crate::error::ControllerError;
use crate::secrets::SecretStore;
use crds::TenantControlPlane;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Field manager used for server-side apply
const FIELD_MANAGER: &str = "tenant-control-plane-controller";

/// Key of the admin kubeconfig inside its secret
pub const ADMIN_KUBECONFIG_KEY: &str = "admin.conf";

/// Errors raised while operating on a tenant cluster
#[derive(Debug, Error)]
pub enum AddonError {
    /// Target object is already absent
    #[error("not found: {0}")]
    NotFound(String),

    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Manifest could not be built
    #[error("invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Kinds of objects add-ons are made of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    ServiceAccount,
    ConfigMap,
    Service,
    Deployment,
    DaemonSet,
    ClusterRole,
    ClusterRoleBinding,
}

/// Identity of an object in the tenant cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    pub fn namespaced(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster(kind: ObjectKind, name: &str) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{:?} {}/{}", self.kind, namespace, self.name),
            None => write!(f, "{:?} {}", self.kind, self.name),
        }
    }
}

/// Typed object to apply to a tenant cluster
#[derive(Debug, Clone)]
pub enum Manifest {
    ServiceAccount(ServiceAccount),
    ConfigMap(ConfigMap),
    Service(Service),
    Deployment(Deployment),
    DaemonSet(DaemonSet),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
}

impl Manifest {
    pub fn object_ref(&self) -> ObjectRef {
        let (kind, meta) = match self {
            Manifest::ServiceAccount(o) => (ObjectKind::ServiceAccount, &o.metadata),
            Manifest::ConfigMap(o) => (ObjectKind::ConfigMap, &o.metadata),
            Manifest::Service(o) => (ObjectKind::Service, &o.metadata),
            Manifest::Deployment(o) => (ObjectKind::Deployment, &o.metadata),
            Manifest::DaemonSet(o) => (ObjectKind::DaemonSet, &o.metadata),
            Manifest::ClusterRole(o) => (ObjectKind::ClusterRole, &o.metadata),
            Manifest::ClusterRoleBinding(o) => (ObjectKind::ClusterRoleBinding, &o.metadata),
        };
        ObjectRef {
            kind,
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

/// Operations add-on installers and removers need on a tenant cluster
#[async_trait::async_trait]
pub trait TenantCluster: Send + Sync {
    /// Create or update an object (idempotent)
    async fn apply(&self, manifest: &Manifest) -> Result<(), AddonError>;

    /// Delete an object; `AddonError::NotFound` when it does not exist
    async fn delete(&self, object: &ObjectRef) -> Result<(), AddonError>;
}

/// Builds a client scoped to a tenant's own cluster
#[async_trait::async_trait]
pub trait TenantClusterFactory: Send + Sync {
    async fn connect(&self, tenant: &TenantControlPlane) -> Result<Arc<dyn TenantCluster>, ControllerError>;
}

/// `TenantCluster` speaking to the tenant API server
pub struct KubeTenantCluster {
    client: Client,
}

impl KubeTenantCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced_api<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace.unwrap_or("kube-system"))
    }

    fn cluster_api<K>(&self) -> Api<K>
    where
        K: kube::Resource<DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }
}

async fn apply_with<K>(api: Api<K>, object: &K) -> Result<(), AddonError>
where
    K: kube::Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned,
{
    let name = object.meta().name.clone().unwrap_or_default();
    let params = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(&name, &params, &Patch::Apply(object)).await?;
    Ok(())
}

async fn delete_with<K>(api: Api<K>, object: &ObjectRef) -> Result<(), AddonError>
where
    K: kube::Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
{
    if api.get_opt(&object.name).await?.is_none() {
        return Err(AddonError::NotFound(object.to_string()));
    }
    api.delete(&object.name, &DeleteParams::background())
        .await
        .map_err(|e| delete_error(object, e))?;
    Ok(())
}

/// The object may vanish between the lookup and the delete
fn delete_error(object: &ObjectRef, error: kube::Error) -> AddonError {
    match error {
        kube::Error::Api(ae) if ae.code == 404 => AddonError::NotFound(object.to_string()),
        other => AddonError::Kube(other),
    }
}

#[async_trait::async_trait]
impl TenantCluster for KubeTenantCluster {
    async fn apply(&self, manifest: &Manifest) -> Result<(), AddonError> {
        let target = manifest.object_ref();
        debug!("Applying {}", target);
        let namespace = target.namespace.as_deref();
        match manifest {
            Manifest::ServiceAccount(o) => apply_with(self.namespaced_api(namespace), o).await,
            Manifest::ConfigMap(o) => apply_with(self.namespaced_api(namespace), o).await,
            Manifest::Service(o) => apply_with(self.namespaced_api(namespace), o).await,
            Manifest::Deployment(o) => apply_with(self.namespaced_api(namespace), o).await,
            Manifest::DaemonSet(o) => apply_with(self.namespaced_api(namespace), o).await,
            Manifest::ClusterRole(o) => apply_with(self.cluster_api(), o).await,
            Manifest::ClusterRoleBinding(o) => apply_with(self.cluster_api(), o).await,
        }
    }

    async fn delete(&self, object: &ObjectRef) -> Result<(), AddonError> {
        debug!("Deleting {}", object);
        let namespace = object.namespace.as_deref();
        match object.kind {
            ObjectKind::ServiceAccount => {
                delete_with(self.namespaced_api::<ServiceAccount>(namespace), object).await
            }
            ObjectKind::ConfigMap => {
                delete_with(self.namespaced_api::<ConfigMap>(namespace), object).await
            }
            ObjectKind::Service => delete_with(self.namespaced_api::<Service>(namespace), object).await,
            ObjectKind::Deployment => {
                delete_with(self.namespaced_api::<Deployment>(namespace), object).await
            }
            ObjectKind::DaemonSet => {
                delete_with(self.namespaced_api::<DaemonSet>(namespace), object).await
            }
            ObjectKind::ClusterRole => delete_with(self.cluster_api::<ClusterRole>(), object).await,
            ObjectKind::ClusterRoleBinding => {
                delete_with(self.cluster_api::<ClusterRoleBinding>(), object).await
            }
        }
    }
}

/// Connects to tenant clusters with the admin kubeconfig stored in the
/// tenant namespace
pub struct KubeconfigClusterFactory {
    secrets: Arc<dyn SecretStore>,
}

impl KubeconfigClusterFactory {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }
}

#[async_trait::async_trait]
impl TenantClusterFactory for KubeconfigClusterFactory {
    async fn connect(&self, tenant: &TenantControlPlane) -> Result<Arc<dyn TenantCluster>, ControllerError> {
        let namespace = tenant.metadata.namespace.as_deref().unwrap_or("default");
        let secret_name = tenant.admin_kubeconfig_secret().ok_or_else(|| {
            ControllerError::DependencyUnavailable("admin kubeconfig not yet generated".to_string())
        })?;

        let data = self.secrets.get(namespace, secret_name).await?.ok_or_else(|| {
            ControllerError::DependencyUnavailable(format!(
                "admin kubeconfig secret {namespace}/{secret_name} not found"
            ))
        })?;
        let raw = data.get(ADMIN_KUBECONFIG_KEY).ok_or_else(|| {
            ControllerError::DependencyUnavailable(format!(
                "secret {namespace}/{secret_name} has no {ADMIN_KUBECONFIG_KEY} key"
            ))
        })?;

        let kubeconfig = Kubeconfig::from_yaml(raw).map_err(|e| {
            ControllerError::DependencyUnavailable(format!("invalid admin kubeconfig: {e}"))
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| {
                ControllerError::DependencyUnavailable(format!("invalid admin kubeconfig: {e}"))
            })?;
        let client = Client::try_from(config)?;

        Ok(Arc::new(KubeTenantCluster::new(client)))
    }
}
