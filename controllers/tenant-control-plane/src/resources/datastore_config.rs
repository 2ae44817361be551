//! Datastore config resource.
//!
//! Makes sure the tenant has a credentials secret naming the schema, user and
//! password it owns inside the datastore, and records its fingerprint in
//! `status.storage.config`. The secret is generated once and then reused, so
//! the fingerprint only moves when the datastore assignment changes.

use super::{OperationResult, Resource};
use crate::checksum;
use crate::error::ControllerError;
use crate::secrets::{SecretData, SecretStore};
use crds::TenantControlPlane;
use kube::{Resource as _, ResourceExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

pub const SCHEMA_KEY: &str = "DB_SCHEMA";
pub const USER_KEY: &str = "DB_USER";
pub const PASSWORD_KEY: &str = "DB_PASSWORD";

/// Name of the credentials secret of `tenant`
pub fn secret_name(tenant: &TenantControlPlane) -> String {
    format!("{}-datastore-config", tenant.name_any())
}

/// PostgreSQL truncates identifiers past this many bytes
const MAX_IDENTIFIER_LEN: usize = 63;
const IDENTIFIER_HASH_LEN: usize = 12;

/// Identifier used for both the schema and the user of `tenant`.
///
/// A readable `namespace_name` prefix, cut to fit, followed by a digest of
/// `namespace/name`, which keeps tenants whose sanitized names collide apart.
pub fn tenant_identifier(tenant: &TenantControlPlane) -> String {
    let namespace = tenant.namespace().unwrap_or_else(|| "default".to_string());
    let name = tenant.name_any();

    let mut prefix: String = format!("{namespace}_{name}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    prefix.truncate(MAX_IDENTIFIER_LEN - IDENTIFIER_HASH_LEN - 1);

    let digest = checksum::digest(format!("{namespace}/{name}").as_bytes());
    format!("{prefix}_{}", &digest[..IDENTIFIER_HASH_LEN])
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFingerprint<'a> {
    data: &'a SecretData,
    data_store: &'a str,
}

pub struct DataStoreConfig {
    secrets: Arc<dyn SecretStore>,
    data_store_name: String,
    driver: String,
    secret_name: String,
    data: SecretData,
    existing: bool,
    checksum: String,
}

impl DataStoreConfig {
    pub fn new(secrets: Arc<dyn SecretStore>, data_store_name: &str, driver: &str) -> Self {
        Self {
            secrets,
            data_store_name: data_store_name.to_string(),
            driver: driver.to_string(),
            secret_name: String::new(),
            data: SecretData::new(),
            existing: false,
            checksum: String::new(),
        }
    }

    /// Fingerprint computed by `define`
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    fn generate(tenant: &TenantControlPlane) -> SecretData {
        let identifier = tenant_identifier(tenant);
        SecretData::from([
            (SCHEMA_KEY.to_string(), identifier.clone()),
            (USER_KEY.to_string(), identifier),
            (PASSWORD_KEY.to_string(), uuid::Uuid::new_v4().simple().to_string()),
        ])
    }
}

#[async_trait::async_trait]
impl Resource for DataStoreConfig {
    async fn define(&mut self, tenant: &TenantControlPlane) -> Result<(), ControllerError> {
        let namespace = tenant.namespace().unwrap_or_else(|| "default".to_string());
        self.secret_name = secret_name(tenant);

        match self.secrets.get(&namespace, &self.secret_name).await? {
            Some(data) => {
                for key in [SCHEMA_KEY, USER_KEY, PASSWORD_KEY] {
                    if !data.contains_key(key) {
                        return Err(ControllerError::DependencyUnavailable(format!(
                            "secret {}/{} has no {} key",
                            namespace, self.secret_name, key
                        )));
                    }
                }
                self.data = data;
                self.existing = true;
            }
            None => {
                debug!("Secret {}/{} not found, generating credentials", namespace, self.secret_name);
                self.data = Self::generate(tenant);
                self.existing = false;
            }
        }

        self.checksum = checksum::compute(&ConfigFingerprint {
            data: &self.data,
            data_store: &self.data_store_name,
        })?;
        Ok(())
    }

    fn should_status_be_updated(&self, tenant: &TenantControlPlane) -> bool {
        let storage = tenant.storage_status();
        storage.config.secret_name != self.secret_name
            || !checksum::is_up_to_date(&storage.config.checksum, &self.checksum)
            || storage.driver != self.driver
            || storage.data_store_name != self.data_store_name
    }

    fn should_cleanup(&self, _tenant: &TenantControlPlane) -> bool {
        false
    }

    async fn create_or_update(
        &mut self,
        tenant: &TenantControlPlane,
    ) -> Result<OperationResult, ControllerError> {
        if self.existing {
            return Ok(OperationResult::NoOp);
        }

        let namespace = tenant.namespace().unwrap_or_else(|| "default".to_string());
        let owner = tenant.controller_owner_ref(&());
        self.secrets
            .create(&namespace, &self.secret_name, self.data.clone(), owner)
            .await?;
        self.existing = true;
        info!("Created datastore config secret {}/{}", namespace, self.secret_name);
        Ok(OperationResult::Created)
    }

    async fn clean_up(&mut self, _tenant: &TenantControlPlane) -> Result<bool, ControllerError> {
        Ok(false)
    }

    async fn update_tenant_control_plane_status(
        &mut self,
        tenant: &mut TenantControlPlane,
    ) -> Result<(), ControllerError> {
        let storage = &mut tenant.status_mut().storage;
        storage.driver = self.driver.clone();
        storage.data_store_name = self.data_store_name.clone();
        storage.config.secret_name = self.secret_name.clone();
        storage.config.checksum = self.checksum.clone();
        Ok(())
    }

    fn name(&self) -> &str {
        "datastore-config"
    }
}
