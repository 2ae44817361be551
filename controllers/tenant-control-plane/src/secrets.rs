//! Secret access on the management cluster.
//!
//! Resources read credentials and kubeconfigs through `SecretStore` so the
//! reconciliation logic can be tested without an API server.

use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::PostParams;
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::debug;

/// Decoded secret payload, key to UTF-8 value
pub type SecretData = BTreeMap<String, String>;

#[async_trait::async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret; `Ok(None)` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, ControllerError>;

    /// Create a secret owned by `owner`
    async fn create(
        &self,
        namespace: &str,
        name: &str,
        data: SecretData,
        owner: Option<OwnerReference>,
    ) -> Result<(), ControllerError>;
}

/// `SecretStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<SecretData>, ControllerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = api.get_opt(name).await? else {
            debug!("Secret {}/{} not found", namespace, name);
            return Ok(None);
        };

        let mut data: SecretData = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, String::from_utf8_lossy(&value.0).into_owned()))
            .collect();
        if let Some(string_data) = secret.string_data {
            data.extend(string_data);
        }
        Ok(Some(data))
    }

    async fn create(
        &self,
        namespace: &str,
        name: &str,
        data: SecretData,
        owner: Option<OwnerReference>,
    ) -> Result<(), ControllerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                owner_references: owner.map(|owner| vec![owner]),
                ..Default::default()
            },
            string_data: Some(data),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };
        api.create(&PostParams::default(), &secret).await?;
        Ok(())
    }
}
