//! Datastore setup resource.
//!
//! Provisions the tenant schema, user and grant inside the datastore from the
//! credentials secret written by the config resource. When the recorded setup
//! fingerprint no longer matches the config fingerprint, the previous
//! artifacts are torn down before the current ones are provisioned.

use super::datastore_config::{PASSWORD_KEY, SCHEMA_KEY, USER_KEY};
use super::{OperationResult, Resource};
use crate::checksum;
use crate::error::ControllerError;
use crate::secrets::SecretStore;
use chrono::Utc;
use crds::TenantControlPlane;
use datastore_client::{Connection, DataStoreError};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Artifacts of one tenant, loaded by `define` for a single cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupResource {
    pub schema: String,
    pub user: String,
    pub password: String,
}

pub struct DataStoreSetup {
    resource: SetupResource,
    secrets: Arc<dyn SecretStore>,
    connection: Arc<dyn Connection>,
    driver: String,
    /// Result of the last `create_or_update`
    last_result: OperationResult,
}

fn failed(operation: &'static str, artifact: String) -> impl FnOnce(DataStoreError) -> ControllerError {
    move |source| ControllerError::DatastoreOperationFailed {
        operation,
        artifact,
        source,
    }
}

impl DataStoreSetup {
    pub fn new(secrets: Arc<dyn SecretStore>, connection: Arc<dyn Connection>, driver: &str) -> Self {
        Self {
            resource: SetupResource::default(),
            secrets,
            connection,
            driver: driver.to_string(),
            last_result: OperationResult::NoOp,
        }
    }

    pub fn resource(&self) -> &SetupResource {
        &self.resource
    }

    /// Revoke the grant, then drop the schema, then drop the user.
    ///
    /// Targets the artifacts recorded in the tenant status, falling back to
    /// the ones loaded by `define`. Absent artifacts are skipped.
    pub async fn delete(&self, tenant: &TenantControlPlane) -> Result<(), ControllerError> {
        let setup = tenant.storage_status().setup;
        let schema = if setup.schema.is_empty() {
            self.resource.schema.clone()
        } else {
            setup.schema
        };
        let user = if setup.user.is_empty() {
            self.resource.user.clone()
        } else {
            setup.user
        };

        self.revoke_privileges(&user, &schema).await?;
        self.delete_schema(&schema).await?;
        self.delete_user(&user).await?;
        Ok(())
    }

    async fn provision(&self) -> Result<OperationResult, ControllerError> {
        let schema = self.create_schema().await?;
        let user = self.create_user().await?;
        let grant = self.grant_privileges().await?;
        Ok(schema.merge(user).merge(grant))
    }

    async fn create_schema(&self) -> Result<OperationResult, ControllerError> {
        let schema = &self.resource.schema;
        let artifact = format!("schema {schema}");
        if self
            .connection
            .schema_exists(schema)
            .await
            .map_err(failed("check", artifact.clone()))?
        {
            return Ok(OperationResult::NoOp);
        }

        self.connection
            .create_schema(schema)
            .await
            .map_err(failed("create", artifact))?;
        debug!("Created schema {}", schema);
        Ok(OperationResult::Created)
    }

    async fn create_user(&self) -> Result<OperationResult, ControllerError> {
        let user = &self.resource.user;
        let artifact = format!("user {user}");
        if self
            .connection
            .user_exists(user)
            .await
            .map_err(failed("check", artifact.clone()))?
        {
            return Ok(OperationResult::NoOp);
        }

        self.connection
            .create_user(user, &self.resource.password)
            .await
            .map_err(failed("create", artifact))?;
        debug!("Created user {}", user);
        Ok(OperationResult::Created)
    }

    async fn grant_privileges(&self) -> Result<OperationResult, ControllerError> {
        let SetupResource { schema, user, .. } = &self.resource;
        let artifact = format!("privileges of {user} on {schema}");
        if self
            .connection
            .grant_privileges_exists(user, schema)
            .await
            .map_err(failed("check", artifact.clone()))?
        {
            return Ok(OperationResult::NoOp);
        }

        self.connection
            .grant_privileges(user, schema)
            .await
            .map_err(failed("grant", artifact))?;
        debug!("Granted {} privileges on {}", user, schema);
        Ok(OperationResult::Created)
    }

    async fn revoke_privileges(&self, user: &str, schema: &str) -> Result<(), ControllerError> {
        let artifact = format!("privileges of {user} on {schema}");
        if !self
            .connection
            .grant_privileges_exists(user, schema)
            .await
            .map_err(failed("check", artifact.clone()))?
        {
            return Ok(());
        }
        self.connection
            .revoke_privileges(user, schema)
            .await
            .map_err(failed("revoke", artifact))
    }

    async fn delete_schema(&self, schema: &str) -> Result<(), ControllerError> {
        let artifact = format!("schema {schema}");
        if !self
            .connection
            .schema_exists(schema)
            .await
            .map_err(failed("check", artifact.clone()))?
        {
            return Ok(());
        }
        self.connection
            .delete_schema(schema)
            .await
            .map_err(failed("delete", artifact))
    }

    async fn delete_user(&self, user: &str) -> Result<(), ControllerError> {
        let artifact = format!("user {user}");
        if !self
            .connection
            .user_exists(user)
            .await
            .map_err(failed("check", artifact.clone()))?
        {
            return Ok(());
        }
        self.connection
            .delete_user(user)
            .await
            .map_err(failed("delete", artifact))
    }
}

#[async_trait::async_trait]
impl Resource for DataStoreSetup {
    async fn define(&mut self, tenant: &TenantControlPlane) -> Result<(), ControllerError> {
        let namespace = tenant.namespace().unwrap_or_else(|| "default".to_string());
        let secret_name = tenant.storage_status().config.secret_name;
        if secret_name.is_empty() {
            return Err(ControllerError::DependencyUnavailable(
                "datastore config secret not yet recorded".to_string(),
            ));
        }

        let data = self.secrets.get(&namespace, &secret_name).await?.ok_or_else(|| {
            ControllerError::DependencyUnavailable(format!(
                "datastore config secret {namespace}/{secret_name} not found"
            ))
        })?;
        let value = |key: &str| {
            data.get(key).cloned().ok_or_else(|| {
                ControllerError::DependencyUnavailable(format!(
                    "secret {namespace}/{secret_name} has no {key} key"
                ))
            })
        };

        self.resource = SetupResource {
            schema: value(SCHEMA_KEY)?,
            user: value(USER_KEY)?,
            password: value(PASSWORD_KEY)?,
        };
        Ok(())
    }

    fn should_status_be_updated(&self, tenant: &TenantControlPlane) -> bool {
        let storage = tenant.storage_status();
        storage.driver != self.driver
            && !checksum::is_up_to_date(&storage.setup.checksum, &storage.config.checksum)
    }

    fn should_cleanup(&self, _tenant: &TenantControlPlane) -> bool {
        false
    }

    async fn create_or_update(
        &mut self,
        tenant: &TenantControlPlane,
    ) -> Result<OperationResult, ControllerError> {
        let storage = tenant.storage_status();
        if !storage.setup.checksum.is_empty()
            && !checksum::is_up_to_date(&storage.setup.checksum, &storage.config.checksum)
        {
            warn!(
                "Storage configuration of {} drifted, tearing down {}/{}",
                tenant.name_any(),
                storage.setup.schema,
                storage.setup.user
            );
            self.delete(tenant).await?;
            self.provision().await?;
            info!("Reprovisioned schema {} for {}", self.resource.schema, tenant.name_any());
            self.last_result = OperationResult::Updated;
            return Ok(self.last_result);
        }

        self.last_result = self.provision().await?;
        Ok(self.last_result)
    }

    async fn clean_up(&mut self, _tenant: &TenantControlPlane) -> Result<bool, ControllerError> {
        Ok(false)
    }

    async fn update_tenant_control_plane_status(
        &mut self,
        tenant: &mut TenantControlPlane,
    ) -> Result<(), ControllerError> {
        let storage = &mut tenant.status_mut().storage;
        let setup = &mut storage.setup;
        // A pass that touched the datastore is stamped even when it only
        // recreated what the status already names
        if self.last_result != OperationResult::NoOp
            || setup.schema != self.resource.schema
            || setup.user != self.resource.user
            || setup.checksum != storage.config.checksum
            || setup.last_update.is_none()
        {
            setup.schema = self.resource.schema.clone();
            setup.user = self.resource.user.clone();
            setup.checksum = storage.config.checksum.clone();
            setup.last_update = Some(Utc::now());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "datastore-setup"
    }
}
