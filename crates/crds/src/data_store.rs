//! DataStore CRD
//!
//! Cluster-scoped description of a datastore backend shared by tenants.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "controlplane.microscaler.io",
    version = "v1alpha1",
    kind = "DataStore",
    status = "DataStoreStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DataStoreSpec {
    /// Backend driver
    pub driver: Driver,

    /// Endpoints of the backend (host:port)
    pub endpoints: Vec<String>,

    /// Credentials of the administrative user (not needed for etcd)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum Driver {
    #[serde(rename = "PostgreSQL")]
    PostgreSql,
    #[serde(rename = "MySQL")]
    MySql,
    #[serde(rename = "etcd")]
    Etcd,
}

impl Driver {
    pub fn as_str(self) -> &'static str {
        match self {
            Driver::PostgreSql => "PostgreSQL",
            Driver::MySql => "MySQL",
            Driver::Etcd => "etcd",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuth {
    pub username: SecretKeyReference,
    pub password: SecretKeyReference,
}

/// Reference to a single key of a Secret
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyReference {
    pub name: String,
    pub namespace: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataStoreStatus {
    /// Tenant control planes using this datastore (namespace/name)
    #[serde(default)]
    pub used_by: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_wire_names() {
        let spec: DataStoreSpec = serde_json::from_value(serde_json::json!({
            "driver": "PostgreSQL",
            "endpoints": ["postgres.datastores:5432"],
            "basicAuth": {
                "username": { "name": "root", "namespace": "datastores", "key": "username" },
                "password": { "name": "root", "namespace": "datastores", "key": "password" }
            }
        }))
        .unwrap();
        assert_eq!(spec.driver, Driver::PostgreSql);
        assert_eq!(spec.driver.to_string(), "PostgreSQL");
        assert_eq!(spec.basic_auth.unwrap().password.key, "password");

        assert_eq!(serde_json::to_value(Driver::Etcd).unwrap(), "etcd");
    }
}
