//! Resources driven on behalf of a TenantControlPlane.
//!
//! Every dependent resource implements the `Resource` contract and is run
//! through `driver::handle`:
//! - `datastore_config`: credentials secret and storage config fingerprint
//! - `datastore_setup`: schema, user and grant inside the datastore
//! - `addons`: CoreDNS and kube-proxy inside the tenant cluster

pub mod addons;
pub mod datastore_config;
pub mod datastore_setup;

use crate::error::ControllerError;
use crds::TenantControlPlane;
use std::fmt;

/// Outcome of `Resource::create_or_update`.
///
/// Variants are ordered by precedence so results of several steps can be
/// folded with `merge`: `Created > Updated > NoOp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum OperationResult {
    #[default]
    NoOp,
    Updated,
    Created,
}

impl OperationResult {
    /// Highest-precedence result of `self` and `other`
    pub fn merge(self, other: OperationResult) -> OperationResult {
        self.max(other)
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationResult::NoOp => f.write_str("unchanged"),
            OperationResult::Updated => f.write_str("updated"),
            OperationResult::Created => f.write_str("created"),
        }
    }
}

/// Contract every dependent resource fulfils.
///
/// A resource is used for a single reconciliation of a single tenant:
/// `define` loads whatever inputs the later steps need, and the state it
/// stores is discarded at the end of the cycle.
#[async_trait::async_trait]
pub trait Resource: Send + Sync {
    /// Load inputs; `DependencyUnavailable` when one cannot be read
    async fn define(&mut self, tenant: &TenantControlPlane) -> Result<(), ControllerError>;

    /// Whether the recorded status differs from what this resource would write
    fn should_status_be_updated(&self, tenant: &TenantControlPlane) -> bool;

    /// Whether the resource must be removed instead of reconciled
    fn should_cleanup(&self, tenant: &TenantControlPlane) -> bool;

    /// Drive the external state to the desired configuration
    async fn create_or_update(
        &mut self,
        tenant: &TenantControlPlane,
    ) -> Result<OperationResult, ControllerError>;

    /// Remove the external state; `Ok(false)` when there was nothing to remove
    async fn clean_up(&mut self, tenant: &TenantControlPlane) -> Result<bool, ControllerError>;

    /// Forget recorded status after a clean up
    fn clear_tenant_control_plane_status(&self, _tenant: &mut TenantControlPlane) {}

    /// Record the outcome of a successful `create_or_update`
    async fn update_tenant_control_plane_status(
        &mut self,
        tenant: &mut TenantControlPlane,
    ) -> Result<(), ControllerError>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_precedence() {
        use OperationResult::*;
        assert_eq!(NoOp.merge(NoOp), NoOp);
        assert_eq!(NoOp.merge(Updated), Updated);
        assert_eq!(Updated.merge(NoOp), Updated);
        assert_eq!(Updated.merge(Created), Created);
        assert_eq!(Created.merge(Updated), Created);
        assert_eq!(Created.merge(NoOp), Created);
    }

    #[test]
    fn test_fold_results() {
        let results = [OperationResult::NoOp, OperationResult::Created, OperationResult::Updated];
        let folded = results.into_iter().fold(OperationResult::default(), OperationResult::merge);
        assert_eq!(folded, OperationResult::Created);
    }
}
