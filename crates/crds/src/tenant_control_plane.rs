//! TenantControlPlane CRD
//!
//! Declares the desired state of a tenant control plane and records the
//! observed state of the resources the controller drives for it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// TenantControlPlaneSpec defines the desired state of a tenant control plane
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "controlplane.microscaler.io",
    version = "v1alpha1",
    kind = "TenantControlPlane",
    shortname = "tcp",
    namespaced,
    status = "TenantControlPlaneStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TenantControlPlaneSpec {
    /// Name of the DataStore backing this control plane (cluster-scoped resource)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_store: Option<String>,

    /// Kubernetes settings of the tenant control plane
    #[serde(default)]
    pub kubernetes: KubernetesSpec,

    /// Tenant cluster networking
    #[serde(default)]
    pub networking: NetworkingSpec,

    /// Add-ons installed into the tenant cluster
    #[serde(default)]
    pub addons: AddonsSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesSpec {
    /// Kubernetes version (e.g. "v1.30.2")
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkingSpec {
    /// Address the tenant API server is reachable on (host:port)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<String>,

    /// Service CIDR of the tenant cluster
    #[serde(default = "default_service_cidr")]
    pub service_cidr: String,

    /// Pod CIDR of the tenant cluster
    #[serde(default = "default_pod_cidr")]
    pub pod_cidr: String,

    /// DNS service IPs announced to the tenant kubelets
    #[serde(default)]
    pub dns_service_ips: Vec<String>,

    /// Cluster DNS domain
    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,
}

impl Default for NetworkingSpec {
    fn default() -> Self {
        Self {
            control_plane_endpoint: None,
            service_cidr: default_service_cidr(),
            pod_cidr: default_pod_cidr(),
            dns_service_ips: Vec::new(),
            cluster_domain: default_cluster_domain(),
        }
    }
}

fn default_service_cidr() -> String {
    "10.96.0.0/16".to_string()
}

fn default_pod_cidr() -> String {
    "10.244.0.0/16".to_string()
}

fn default_cluster_domain() -> String {
    "cluster.local".to_string()
}

/// Add-on declarations. An absent add-on is removed from the tenant cluster.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddonsSpec {
    /// CoreDNS add-on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_dns: Option<AddonSpec>,

    /// kube-proxy add-on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_proxy: Option<AddonSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddonSpec {
    /// Image repository override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_repository: Option<String>,

    /// Image tag override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
}

/// TenantControlPlaneStatus defines the observed state of a tenant control plane
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantControlPlaneStatus {
    /// Kubeconfig secrets generated for the tenant
    #[serde(default)]
    pub kubeconfig: KubeconfigsStatus,

    /// Storage provisioning state
    #[serde(default)]
    pub storage: StorageStatus,

    /// Add-on installation state
    #[serde(default)]
    pub addons: AddonsStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubeconfigsStatus {
    /// Admin kubeconfig of the tenant cluster
    #[serde(default)]
    pub admin: KubeconfigStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubeconfigStatus {
    /// Secret holding the kubeconfig under the `admin.conf` key
    #[serde(default)]
    pub secret_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddonsStatus {
    #[serde(default)]
    pub core_dns: AddonStatus,

    #[serde(default)]
    pub kube_proxy: AddonStatus,
}

/// Fingerprint of the add-on configuration currently installed.
///
/// An empty checksum means the add-on is not installed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddonStatus {
    #[serde(default)]
    pub checksum: String,

    /// Serialized as `null` once cleared so a merge patch removes it
    #[serde(default)]
    pub last_update: Option<chrono::DateTime<chrono::Utc>>,
}

/// Storage state of the tenant.
///
/// When `setup.checksum == config.checksum` and `driver` matches the desired
/// driver, the provisioned schema, user and grants match `config`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageStatus {
    /// Driver of the datastore currently provisioned
    #[serde(default)]
    pub driver: String,

    /// DataStore currently in use
    #[serde(default)]
    pub data_store_name: String,

    #[serde(default)]
    pub config: StorageConfigStatus,

    #[serde(default)]
    pub setup: StorageSetupStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfigStatus {
    /// Secret holding DB_SCHEMA, DB_USER and DB_PASSWORD
    #[serde(default)]
    pub secret_name: String,

    /// Fingerprint of the desired storage configuration
    #[serde(default)]
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSetupStatus {
    #[serde(default)]
    pub schema: String,

    #[serde(default)]
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<chrono::DateTime<chrono::Utc>>,

    /// Fingerprint of the storage configuration as of the last successful provisioning
    #[serde(default)]
    pub checksum: String,
}

impl TenantControlPlane {
    /// Observed storage state, empty when no status has been recorded yet
    pub fn storage_status(&self) -> StorageStatus {
        self.status
            .as_ref()
            .map(|status| status.storage.clone())
            .unwrap_or_default()
    }

    /// Observed add-on state, empty when no status has been recorded yet
    pub fn addons_status(&self) -> AddonsStatus {
        self.status
            .as_ref()
            .map(|status| status.addons.clone())
            .unwrap_or_default()
    }

    /// Name of the secret holding the tenant admin kubeconfig
    pub fn admin_kubeconfig_secret(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|status| status.kubeconfig.admin.secret_name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// Status, created empty on first access
    pub fn status_mut(&mut self) -> &mut TenantControlPlaneStatus {
        self.status.get_or_insert_with(TenantControlPlaneStatus::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_defaults_from_empty_object() {
        let spec: TenantControlPlaneSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.networking.service_cidr, "10.96.0.0/16");
        assert_eq!(spec.networking.cluster_domain, "cluster.local");
        assert!(spec.addons.core_dns.is_none());
        assert!(spec.data_store.is_none());
    }

    #[test]
    fn test_status_uses_camel_case() {
        let mut tcp = TenantControlPlane::new("tenant-a", TenantControlPlaneSpec::default());
        tcp.status_mut().storage.config.secret_name = "tenant-a-datastore-config".to_string();
        tcp.status_mut().addons.kube_proxy.checksum = "abc".to_string();

        let value = serde_json::to_value(tcp.status.as_ref().unwrap()).unwrap();
        assert_eq!(value["storage"]["config"]["secretName"], "tenant-a-datastore-config");
        assert_eq!(value["addons"]["kubeProxy"]["checksum"], "abc");
    }

    #[test]
    fn test_cleared_addon_status_patches_last_update_away() {
        let mut tcp = TenantControlPlane::new("tenant-a", TenantControlPlaneSpec::default());
        tcp.status_mut().addons.core_dns = AddonStatus {
            checksum: "abc".to_string(),
            last_update: Some(chrono::Utc::now()),
        };
        tcp.status_mut().addons.core_dns = AddonStatus::default();

        let value = serde_json::to_value(tcp.status.as_ref().unwrap()).unwrap();
        let core_dns = value["addons"]["coreDns"].as_object().unwrap();
        assert!(core_dns.contains_key("lastUpdate"));
        assert!(core_dns["lastUpdate"].is_null());
    }

    #[test]
    fn test_status_accessors_without_status() {
        let tcp = TenantControlPlane::new("tenant-a", TenantControlPlaneSpec::default());
        assert_eq!(tcp.storage_status(), StorageStatus::default());
        assert!(tcp.admin_kubeconfig_secret().is_none());
    }
}
