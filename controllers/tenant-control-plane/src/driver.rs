//! Generic reconciliation driver.
//!
//! Runs one `Resource` against one tenant: define, then either clean up or
//! create/update followed by a status update. Any error aborts the sequence
//! and is returned to the caller; nothing is retried here.

use crate::error::ControllerError;
use crate::resources::{OperationResult, Resource};
use crds::TenantControlPlane;
use tracing::{debug, info};

/// What `handle` did with a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The resource was removed (`removed` is false when it was already absent)
    CleanedUp { removed: bool, status_changed: bool },
    /// The resource was created or updated
    Applied {
        result: OperationResult,
        status_changed: bool,
    },
}

impl Outcome {
    /// Whether the in-memory tenant status must be persisted
    pub fn status_changed(&self) -> bool {
        match self {
            Outcome::CleanedUp { status_changed, .. } | Outcome::Applied { status_changed, .. } => {
                *status_changed
            }
        }
    }
}

/// Reconcile `resource` for `tenant`, updating `tenant.status` in memory
pub async fn handle(
    resource: &mut dyn Resource,
    tenant: &mut TenantControlPlane,
) -> Result<Outcome, ControllerError> {
    resource.define(tenant).await?;

    if resource.should_cleanup(tenant) {
        let removed = resource.clean_up(tenant).await?;
        let before = tenant.status.clone();
        resource.clear_tenant_control_plane_status(tenant);
        let status_changed = before != tenant.status;
        if removed {
            info!("Resource {} cleaned up", resource.name());
        }
        return Ok(Outcome::CleanedUp {
            removed,
            status_changed,
        });
    }

    let result = resource.create_or_update(tenant).await?;
    let forced = resource.should_status_be_updated(tenant);
    let before = tenant.status.clone();
    resource.update_tenant_control_plane_status(tenant).await?;
    let status_changed = result != OperationResult::NoOp || forced || before != tenant.status;

    debug!(
        "Resource {} {} (status changed: {})",
        resource.name(),
        result,
        status_changed
    );
    Ok(Outcome::Applied {
        result,
        status_changed,
    })
}
