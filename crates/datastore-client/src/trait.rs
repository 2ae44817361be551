//! Connection trait for mocking
//!
//! Abstracts the datastore backend so the setup logic can be exercised in unit
//! tests. Each method is a single fresh round trip to the backend; nothing is
//! cached between calls.

use crate::error::DataStoreError;

/// Tenancy operations against one live datastore backend.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Driver name, matching the `DataStore` driver it was opened for
    fn driver(&self) -> &'static str;

    /// Round trip to verify the backend is reachable
    async fn check(&self) -> Result<(), DataStoreError>;

    async fn schema_exists(&self, schema: &str) -> Result<bool, DataStoreError>;
    async fn create_schema(&self, schema: &str) -> Result<(), DataStoreError>;
    async fn delete_schema(&self, schema: &str) -> Result<(), DataStoreError>;

    async fn user_exists(&self, user: &str) -> Result<bool, DataStoreError>;
    async fn create_user(&self, user: &str, password: &str) -> Result<(), DataStoreError>;
    async fn delete_user(&self, user: &str) -> Result<(), DataStoreError>;

    async fn grant_privileges_exists(&self, user: &str, schema: &str) -> Result<bool, DataStoreError>;
    async fn grant_privileges(&self, user: &str, schema: &str) -> Result<(), DataStoreError>;
    async fn revoke_privileges(&self, user: &str, schema: &str) -> Result<(), DataStoreError>;

    /// Release pooled connections
    async fn close(&self);
}
