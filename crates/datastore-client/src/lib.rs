//! Datastore Client
//!
//! Connection to the datastore backends that hold tenant control plane data.
//! Exposes the handful of operations needed to provision a tenant: a schema,
//! a user and the privileges linking them.
//!
//! # Example
//!
//! ```no_run
//! use datastore_client::{connect, ConnectionConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connection = connect(&ConnectionConfig {
//!     driver: "PostgreSQL".to_string(),
//!     endpoints: vec!["postgres.datastores:5432".to_string()],
//!     username: "postgres".to_string(),
//!     password: "secret".to_string(),
//!     connect_timeout: Duration::from_secs(10),
//! })
//! .await?;
//!
//! if !connection.schema_exists("default_tenant_a").await? {
//!     connection.create_schema("default_tenant_a").await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod postgres;
#[path = "trait.rs"]
pub mod connection_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use connection_trait::Connection;
pub use error::DataStoreError;
pub use postgres::PostgresConnection;
#[cfg(feature = "test-util")]
pub use mock::{MockConnection, Operation};

use std::time::Duration;

/// Parameters needed to open a connection to a datastore
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Driver name as declared on the DataStore ("PostgreSQL", "MySQL", "etcd")
    pub driver: String,
    pub endpoints: Vec<String>,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
}

/// Open a connection for the configured driver
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn Connection>, DataStoreError> {
    let endpoint = config
        .endpoints
        .first()
        .ok_or_else(|| DataStoreError::InvalidConfig("no endpoints configured".to_string()))?;

    match config.driver.as_str() {
        "PostgreSQL" => {
            let connection = PostgresConnection::connect(
                endpoint,
                &config.username,
                &config.password,
                config.connect_timeout,
            )
            .await?;
            Ok(Box::new(connection))
        }
        other => Err(DataStoreError::UnsupportedDriver(other.to_string())),
    }
}
