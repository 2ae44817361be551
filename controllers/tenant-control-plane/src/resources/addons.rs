//! Add-on resource.
//!
//! Installs or removes one add-on in the tenant cluster. The recorded
//! `AddonStatus.checksum` is compared with the fingerprint of the current
//! `AddonConfiguration` to tell whether the installed add-on is current.

use super::{OperationResult, Resource};
use crate::addons::{AddonConfiguration, AddonFunctions, AddonKind, AddonRegistry};
use crate::checksum;
use crate::cluster::{AddonError, TenantClusterFactory};
use crate::error::ControllerError;
use chrono::Utc;
use crds::{AddonStatus, AddonsStatus, TenantControlPlane};
use std::sync::Arc;
use tracing::{debug, info};

pub struct AddonResource {
    kind: AddonKind,
    functions: AddonFunctions,
    clusters: Arc<dyn TenantClusterFactory>,
    config_checksum: String,
    configuration: Option<AddonConfiguration>,
}

impl AddonResource {
    /// Bind `kind` to its functions; fails with `UnsupportedAddon` when the
    /// registry has none
    pub fn new(
        kind: AddonKind,
        registry: &AddonRegistry,
        clusters: Arc<dyn TenantClusterFactory>,
    ) -> Result<Self, ControllerError> {
        Ok(Self {
            kind,
            functions: registry.functions(kind)?,
            clusters,
            config_checksum: String::new(),
            configuration: None,
        })
    }

    /// Fingerprint of the configuration about to be installed
    pub fn set_config_checksum(&mut self, checksum: String) {
        self.config_checksum = checksum;
    }

    fn recorded_checksum(&self, tenant: &TenantControlPlane) -> String {
        status_of(&tenant.addons_status(), self.kind).checksum.clone()
    }
}

fn status_of(status: &AddonsStatus, kind: AddonKind) -> &AddonStatus {
    match kind {
        AddonKind::CoreDns => &status.core_dns,
        AddonKind::KubeProxy => &status.kube_proxy,
    }
}

fn status_of_mut(status: &mut AddonsStatus, kind: AddonKind) -> &mut AddonStatus {
    match kind {
        AddonKind::CoreDns => &mut status.core_dns,
        AddonKind::KubeProxy => &mut status.kube_proxy,
    }
}

/// Fingerprint of the configuration `kind` would be installed with,
/// `None` when the tenant does not declare the add-on
pub fn desired_checksum(
    tenant: &TenantControlPlane,
    kind: AddonKind,
) -> Result<Option<String>, ControllerError> {
    AddonConfiguration::from_tenant(tenant, kind)
        .map(|configuration| checksum::compute(&configuration))
        .transpose()
}

#[async_trait::async_trait]
impl Resource for AddonResource {
    async fn define(&mut self, tenant: &TenantControlPlane) -> Result<(), ControllerError> {
        self.configuration = AddonConfiguration::from_tenant(tenant, self.kind);
        Ok(())
    }

    fn should_status_be_updated(&self, tenant: &TenantControlPlane) -> bool {
        !checksum::is_up_to_date(&self.recorded_checksum(tenant), &self.config_checksum)
    }

    fn should_cleanup(&self, tenant: &TenantControlPlane) -> bool {
        self.kind.spec(tenant).is_none()
    }

    async fn create_or_update(
        &mut self,
        tenant: &TenantControlPlane,
    ) -> Result<OperationResult, ControllerError> {
        let configuration = self.configuration.as_ref().ok_or_else(|| {
            ControllerError::InvalidConfig(format!("addon {} is not declared", self.kind))
        })?;

        let cluster = self.clusters.connect(tenant).await?;
        (self.functions.install)(cluster.as_ref(), configuration)
            .await
            .map_err(|source| ControllerError::ExternalApplyFailed {
                addon: self.kind.to_string(),
                operation: "install",
                source,
            })?;

        let recorded = self.recorded_checksum(tenant);
        let result = if recorded.is_empty() {
            OperationResult::Created
        } else if checksum::is_up_to_date(&recorded, &self.config_checksum) {
            OperationResult::NoOp
        } else {
            OperationResult::Updated
        };
        debug!("Addon {} install {}", self.kind, result);
        Ok(result)
    }

    async fn clean_up(&mut self, tenant: &TenantControlPlane) -> Result<bool, ControllerError> {
        // An empty checksum means nothing was ever installed
        if self.recorded_checksum(tenant).is_empty() {
            return Ok(false);
        }

        let cluster = self.clusters.connect(tenant).await?;
        match (self.functions.remove)(cluster.as_ref()).await {
            Ok(()) => {
                info!("Removed addon {}", self.kind);
                Ok(true)
            }
            Err(AddonError::NotFound(_)) => {
                debug!("Addon {} already absent", self.kind);
                Ok(false)
            }
            Err(source) => Err(ControllerError::ExternalApplyFailed {
                addon: self.kind.to_string(),
                operation: "remove",
                source,
            }),
        }
    }

    fn clear_tenant_control_plane_status(&self, tenant: &mut TenantControlPlane) {
        if let Some(status) = tenant.status.as_mut() {
            *status_of_mut(&mut status.addons, self.kind) = AddonStatus::default();
        }
    }

    async fn update_tenant_control_plane_status(
        &mut self,
        tenant: &mut TenantControlPlane,
    ) -> Result<(), ControllerError> {
        let status = status_of_mut(&mut tenant.status_mut().addons, self.kind);
        if status.checksum != self.config_checksum || status.last_update.is_none() {
            status.checksum = self.config_checksum.clone();
            status.last_update = Some(Utc::now());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        self.kind.resource_name()
    }
}
