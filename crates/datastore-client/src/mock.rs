//! Mock Connection for unit testing
//!
//! Keeps schemas, users and grants in memory, records every mutating call in
//! order and can be told to fail a given operation.

use crate::connection_trait::Connection;
use crate::error::DataStoreError;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Operations understood by the mock, used for failure injection and the call journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SchemaExists,
    CreateSchema,
    DeleteSchema,
    UserExists,
    CreateUser,
    DeleteUser,
    GrantExists,
    Grant,
    Revoke,
}

#[derive(Default)]
struct State {
    schemas: HashSet<String>,
    users: HashMap<String, String>,
    grants: HashSet<(String, String)>,
    failures: HashMap<Operation, String>,
    mutations: Vec<(Operation, String)>,
}

/// In-memory Connection
#[derive(Clone, Default)]
pub struct MockConnection {
    state: Arc<Mutex<State>>,
}

impl MockConnection {
    /// Create an empty mock datastore
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a schema (for test setup)
    pub fn add_schema(&self, schema: &str) {
        self.state.lock().unwrap().schemas.insert(schema.to_string());
    }

    /// Seed a user (for test setup)
    pub fn add_user(&self, user: &str, password: &str) {
        self.state
            .lock()
            .unwrap()
            .users
            .insert(user.to_string(), password.to_string());
    }

    /// Seed a grant (for test setup)
    pub fn add_grant(&self, user: &str, schema: &str) {
        self.state
            .lock()
            .unwrap()
            .grants
            .insert((user.to_string(), schema.to_string()));
    }

    /// Make every call of `operation` fail with `message`
    pub fn fail_on(&self, operation: Operation, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(operation, message.to_string());
    }

    /// Stop failing `operation`
    pub fn clear_failure(&self, operation: Operation) {
        self.state.lock().unwrap().failures.remove(&operation);
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.state.lock().unwrap().schemas.contains(schema)
    }

    pub fn has_user(&self, user: &str) -> bool {
        self.state.lock().unwrap().users.contains_key(user)
    }

    pub fn password_of(&self, user: &str) -> Option<String> {
        self.state.lock().unwrap().users.get(user).cloned()
    }

    pub fn has_grant(&self, user: &str, schema: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .grants
            .contains(&(user.to_string(), schema.to_string()))
    }

    /// Mutating calls in the order they were made, with their target
    pub fn mutations(&self) -> Vec<(Operation, String)> {
        self.state.lock().unwrap().mutations.clone()
    }

    /// Forget recorded mutations
    pub fn reset_mutations(&self) {
        self.state.lock().unwrap().mutations.clear();
    }

    fn check_failure(&self, operation: Operation) -> Result<(), DataStoreError> {
        match self.state.lock().unwrap().failures.get(&operation) {
            Some(message) => Err(DataStoreError::Query(message.clone())),
            None => Ok(()),
        }
    }

    fn record(&self, operation: Operation, target: String) {
        self.state.lock().unwrap().mutations.push((operation, target));
    }
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    fn driver(&self) -> &'static str {
        "PostgreSQL"
    }

    async fn check(&self) -> Result<(), DataStoreError> {
        Ok(())
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool, DataStoreError> {
        self.check_failure(Operation::SchemaExists)?;
        Ok(self.has_schema(schema))
    }

    async fn create_schema(&self, schema: &str) -> Result<(), DataStoreError> {
        self.check_failure(Operation::CreateSchema)?;
        let inserted = self.state.lock().unwrap().schemas.insert(schema.to_string());
        if !inserted {
            return Err(DataStoreError::Query(format!("database \"{schema}\" already exists")));
        }
        self.record(Operation::CreateSchema, schema.to_string());
        Ok(())
    }

    async fn delete_schema(&self, schema: &str) -> Result<(), DataStoreError> {
        self.check_failure(Operation::DeleteSchema)?;
        self.state.lock().unwrap().schemas.remove(schema);
        self.record(Operation::DeleteSchema, schema.to_string());
        Ok(())
    }

    async fn user_exists(&self, user: &str) -> Result<bool, DataStoreError> {
        self.check_failure(Operation::UserExists)?;
        Ok(self.has_user(user))
    }

    async fn create_user(&self, user: &str, password: &str) -> Result<(), DataStoreError> {
        self.check_failure(Operation::CreateUser)?;
        let previous = self
            .state
            .lock()
            .unwrap()
            .users
            .insert(user.to_string(), password.to_string());
        if previous.is_some() {
            return Err(DataStoreError::Query(format!("role \"{user}\" already exists")));
        }
        self.record(Operation::CreateUser, user.to_string());
        Ok(())
    }

    async fn delete_user(&self, user: &str) -> Result<(), DataStoreError> {
        self.check_failure(Operation::DeleteUser)?;
        self.state.lock().unwrap().users.remove(user);
        self.record(Operation::DeleteUser, user.to_string());
        Ok(())
    }

    async fn grant_privileges_exists(&self, user: &str, schema: &str) -> Result<bool, DataStoreError> {
        self.check_failure(Operation::GrantExists)?;
        Ok(self.has_grant(user, schema))
    }

    async fn grant_privileges(&self, user: &str, schema: &str) -> Result<(), DataStoreError> {
        self.check_failure(Operation::Grant)?;
        self.state
            .lock()
            .unwrap()
            .grants
            .insert((user.to_string(), schema.to_string()));
        self.record(Operation::Grant, format!("{user}@{schema}"));
        Ok(())
    }

    async fn revoke_privileges(&self, user: &str, schema: &str) -> Result<(), DataStoreError> {
        self.check_failure(Operation::Revoke)?;
        self.state
            .lock()
            .unwrap()
            .grants
            .remove(&(user.to_string(), schema.to_string()));
        self.record(Operation::Revoke, format!("{user}@{schema}"));
        Ok(())
    }

    async fn close(&self) {}
}
