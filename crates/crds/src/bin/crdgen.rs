//! Prints the CRD manifests as a multi-document YAML stream.

use anyhow::Result;
use crds::{DataStore, TenantControlPlane};
use kube::CustomResourceExt;

fn main() -> Result<()> {
    print!("{}", serde_yaml::to_string(&TenantControlPlane::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&DataStore::crd())?);
    Ok(())
}
