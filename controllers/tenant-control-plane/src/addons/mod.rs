//! In-cluster add-ons.
//!
//! Each add-on kind is bound to an installer and a remover through an
//! `AddonRegistry`. Installers server-side apply the add-on objects and are
//! safe to call repeatedly; removers delete them and report
//! `AddonError::NotFound` when none of the objects existed.

pub mod coredns;
pub mod kube_proxy;

use crate::cluster::{AddonError, ObjectRef, TenantCluster};
use crate::error::ControllerError;
use crds::{AddonSpec, TenantControlPlane};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::debug;

/// Namespace add-ons are installed into
pub const ADDON_NAMESPACE: &str = "kube-system";

/// Add-on discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddonKind {
    CoreDns,
    KubeProxy,
}

impl AddonKind {
    pub const ALL: [AddonKind; 2] = [AddonKind::CoreDns, AddonKind::KubeProxy];

    /// Resource name used in logs and status correlation
    pub fn resource_name(self) -> &'static str {
        match self {
            AddonKind::CoreDns => "coredns",
            AddonKind::KubeProxy => "kube-proxy",
        }
    }

    /// Declared spec of this add-on, `None` when the tenant does not want it
    pub fn spec(self, tenant: &TenantControlPlane) -> Option<&AddonSpec> {
        match self {
            AddonKind::CoreDns => tenant.spec.addons.core_dns.as_ref(),
            AddonKind::KubeProxy => tenant.spec.addons.kube_proxy.as_ref(),
        }
    }
}

impl fmt::Display for AddonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_name())
    }
}

/// Effective configuration an add-on is installed with.
///
/// Its fingerprint is what `AddonStatus.checksum` records.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddonConfiguration {
    pub image: String,
    pub kubernetes_version: String,
    pub cluster_domain: String,
    pub dns_service_ip: String,
    pub pod_cidr: String,
    pub control_plane_endpoint: Option<String>,
}

impl AddonConfiguration {
    /// Configuration of `kind` for `tenant`, `None` when the add-on is not declared
    pub fn from_tenant(tenant: &TenantControlPlane, kind: AddonKind) -> Option<Self> {
        let spec = kind.spec(tenant)?;
        let networking = &tenant.spec.networking;
        let version = tenant.spec.kubernetes.version.clone();

        let (default_repository, default_tag) = match kind {
            AddonKind::CoreDns => ("registry.k8s.io/coredns/coredns", coredns::DEFAULT_VERSION.to_string()),
            AddonKind::KubeProxy => ("registry.k8s.io/kube-proxy", version.clone()),
        };
        let repository = spec.image_repository.as_deref().unwrap_or(default_repository);
        let tag = spec.image_tag.clone().unwrap_or(default_tag);

        let dns_service_ip = networking
            .dns_service_ips
            .first()
            .cloned()
            .or_else(|| nth_address(&networking.service_cidr, 10))
            .unwrap_or_else(|| "10.96.0.10".to_string());

        Some(Self {
            image: format!("{repository}:{tag}"),
            kubernetes_version: version,
            cluster_domain: networking.cluster_domain.clone(),
            dns_service_ip,
            pod_cidr: networking.pod_cidr.clone(),
            control_plane_endpoint: networking.control_plane_endpoint.clone(),
        })
    }
}

/// The `offset`-th address of an IPv4 CIDR
fn nth_address(cidr: &str, offset: u32) -> Option<String> {
    let (base, _) = cidr.split_once('/')?;
    let base: Ipv4Addr = base.parse().ok()?;
    let address = u32::from(base).checked_add(offset)?;
    Some(Ipv4Addr::from(address).to_string())
}

pub type InstallFn =
    for<'a> fn(&'a dyn TenantCluster, &'a AddonConfiguration) -> BoxFuture<'a, Result<(), AddonError>>;
pub type RemoveFn = for<'a> fn(&'a dyn TenantCluster) -> BoxFuture<'a, Result<(), AddonError>>;

/// Installer/remover pair of one add-on kind
#[derive(Clone, Copy)]
pub struct AddonFunctions {
    pub install: InstallFn,
    pub remove: RemoveFn,
}

impl fmt::Debug for AddonFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonFunctions").finish_non_exhaustive()
    }
}

/// Lookup table from add-on kind to its functions
#[derive(Debug, Clone, Default)]
pub struct AddonRegistry {
    table: HashMap<AddonKind, AddonFunctions>,
}

impl AddonRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in CoreDNS and kube-proxy add-ons
    pub fn builtin() -> Self {
        Self::new()
            .with(
                AddonKind::CoreDns,
                AddonFunctions {
                    install: coredns::install,
                    remove: coredns::remove,
                },
            )
            .with(
                AddonKind::KubeProxy,
                AddonFunctions {
                    install: kube_proxy::install,
                    remove: kube_proxy::remove,
                },
            )
    }

    pub fn with(mut self, kind: AddonKind, functions: AddonFunctions) -> Self {
        self.table.insert(kind, functions);
        self
    }

    /// Functions of `kind`, `UnsupportedAddon` if none were registered
    pub fn functions(&self, kind: AddonKind) -> Result<AddonFunctions, ControllerError> {
        self.table
            .get(&kind)
            .copied()
            .ok_or_else(|| ControllerError::UnsupportedAddon(kind.to_string()))
    }
}

/// Apply every manifest in order
pub(crate) async fn apply_all(
    cluster: &dyn TenantCluster,
    manifests: Vec<crate::cluster::Manifest>,
) -> Result<(), AddonError> {
    for manifest in &manifests {
        cluster.apply(manifest).await?;
    }
    Ok(())
}

/// Delete every object, skipping absent ones.
///
/// Returns `NotFound` only if none of the objects existed.
pub(crate) async fn delete_all(
    cluster: &dyn TenantCluster,
    addon: AddonKind,
    objects: Vec<ObjectRef>,
) -> Result<(), AddonError> {
    let mut removed_any = false;
    for object in &objects {
        match cluster.delete(object).await {
            Ok(()) => removed_any = true,
            Err(AddonError::NotFound(_)) => debug!("{} already absent", object),
            Err(e) => return Err(e),
        }
    }

    if removed_any {
        Ok(())
    } else {
        Err(AddonError::NotFound(format!("addon {addon}")))
    }
}
