//! Control plane CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the tenant control plane controller.

pub mod data_store;
pub mod tenant_control_plane;

pub use data_store::*;
pub use tenant_control_plane::*;
