//! PostgreSQL connection
//!
//! Schemas are databases and users are login roles. DDL cannot take bind
//! parameters, so identifiers are validated and quoted before being embedded.

use crate::error::DataStoreError;
use crate::connection_trait::Connection;
use sqlx_core::executor::Executor;
use sqlx_postgres::{PgConnectOptions, PgPool, PgPoolOptions, Postgres};
use std::time::Duration;
use tracing::{debug, info};

/// Postgres identifiers are truncated beyond this many bytes
const MAX_IDENTIFIER_LEN: usize = 63;

/// Administrative database used for every connection
const MAINTENANCE_DATABASE: &str = "postgres";

/// Connection to a PostgreSQL backend through a small pool
pub struct PostgresConnection {
    pool: PgPool,
}

impl PostgresConnection {
    /// Open a pool against `host:port` with administrative credentials
    pub async fn connect(
        endpoint: &str,
        username: &str,
        password: &str,
        connect_timeout: Duration,
    ) -> Result<Self, DataStoreError> {
        let (host, port) = split_endpoint(endpoint)?;
        info!(host = %host, port, "Connecting to PostgreSQL datastore");

        let options = PgConnectOptions::new()
            .host(host)
            .port(port)
            .username(username)
            .password(password)
            .database(MAINTENANCE_DATABASE);

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .min_connections(0)
            .acquire_timeout(connect_timeout)
            .connect_with(options)
            .await?;

        debug!("PostgreSQL connection pool created");
        Ok(Self { pool })
    }

    async fn exists(&self, sql: &str, args: &[&str]) -> Result<bool, DataStoreError> {
        let mut query = sqlx_core::query_scalar::query_scalar::<Postgres, bool>(sql);
        for arg in args {
            query = query.bind(arg.to_string());
        }
        Ok(query.fetch_one(&self.pool).await?)
    }

    async fn execute_ddl(&self, sql: String) -> Result<(), DataStoreError> {
        debug!(statement = %redact(&sql), "Executing DDL");
        self.pool.execute(sql.as_str()).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connection for PostgresConnection {
    fn driver(&self) -> &'static str {
        "PostgreSQL"
    }

    async fn check(&self) -> Result<(), DataStoreError> {
        sqlx_core::query::query::<Postgres>("SELECT 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool, DataStoreError> {
        self.exists(
            "SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)",
            &[schema],
        )
        .await
    }

    async fn create_schema(&self, schema: &str) -> Result<(), DataStoreError> {
        self.execute_ddl(format!("CREATE DATABASE {}", quote_ident(schema)?))
            .await
    }

    async fn delete_schema(&self, schema: &str) -> Result<(), DataStoreError> {
        self.execute_ddl(format!(
            "DROP DATABASE IF EXISTS {} WITH (FORCE)",
            quote_ident(schema)?
        ))
        .await
    }

    async fn user_exists(&self, user: &str) -> Result<bool, DataStoreError> {
        self.exists(
            "SELECT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = $1)",
            &[user],
        )
        .await
    }

    async fn create_user(&self, user: &str, password: &str) -> Result<(), DataStoreError> {
        self.execute_ddl(format!(
            "CREATE ROLE {} LOGIN PASSWORD {}",
            quote_ident(user)?,
            quote_literal(password)
        ))
        .await
    }

    async fn delete_user(&self, user: &str) -> Result<(), DataStoreError> {
        self.execute_ddl(format!("DROP ROLE IF EXISTS {}", quote_ident(user)?))
            .await
    }

    async fn grant_privileges_exists(&self, user: &str, schema: &str) -> Result<bool, DataStoreError> {
        self.exists(
            "SELECT EXISTS (
                SELECT 1 FROM pg_roles r, pg_database d
                WHERE r.rolname = $1 AND d.datname = $2
                  AND has_database_privilege(r.oid, d.oid, 'CREATE')
            )",
            &[user, schema],
        )
        .await
    }

    async fn grant_privileges(&self, user: &str, schema: &str) -> Result<(), DataStoreError> {
        self.execute_ddl(format!(
            "GRANT ALL PRIVILEGES ON DATABASE {} TO {}",
            quote_ident(schema)?,
            quote_ident(user)?
        ))
        .await
    }

    async fn revoke_privileges(&self, user: &str, schema: &str) -> Result<(), DataStoreError> {
        self.execute_ddl(format!(
            "REVOKE ALL PRIVILEGES ON DATABASE {} FROM {}",
            quote_ident(schema)?,
            quote_ident(user)?
        ))
        .await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Split `host:port`, defaulting to 5432
fn split_endpoint(endpoint: &str) -> Result<(&str, u16), DataStoreError> {
    match endpoint.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port.parse::<u16>().map_err(|_| {
                DataStoreError::InvalidConfig(format!("invalid port in endpoint {endpoint}"))
            })?;
            Ok((host, port))
        }
        Some(_) => Err(DataStoreError::InvalidConfig(format!(
            "missing host in endpoint {endpoint}"
        ))),
        None if endpoint.is_empty() => Err(DataStoreError::InvalidConfig(
            "empty endpoint".to_string(),
        )),
        None => Ok((endpoint, 5432)),
    }
}

pub(crate) fn quote_ident(name: &str) -> Result<String, DataStoreError> {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN || name.contains('\0') {
        return Err(DataStoreError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Hide passwords before a statement reaches the logs
fn redact(sql: &str) -> String {
    match sql.find(" PASSWORD ") {
        Some(pos) => format!("{} PASSWORD ****", &sql[..pos]),
        None => sql.to_string(),
    }
}
