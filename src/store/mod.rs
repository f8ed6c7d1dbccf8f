//! Persistent state the session consumes: saved connections, their secrets,
//! and the query history audit trail. Plus the ephemeral per-user slot that
//! holds the "current configuration" between requests.

pub mod client;
pub mod db_pool;
pub mod duck_store;

#[cfg(test)]
pub mod memory;

use crate::session::{ConnectionConfig, DbKind, HistoryId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Pool(String),
    Database(String),
    NotFound(String),
    Task(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Pool(msg) => write!(f, "Connection pool error: {}", msg),
            StoreError::Database(msg) => write!(f, "Database error: {}", msg),
            StoreError::NotFound(what) => write!(f, "{} not found", what),
            StoreError::Task(msg) => write!(f, "Store task failed: {}", msg),
        }
    }
}

impl Error for StoreError {}

impl From<duckdb::Error> for StoreError {
    fn from(err: duckdb::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// A connection saved by a user. Never carries the password; that lives in
/// the secrets collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedConnection {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub db_type: DbKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub database: String,
    pub schema_name: String,
    pub created_at: DateTime<Utc>,
}

impl SavedConnection {
    pub fn to_config(&self, password: String) -> ConnectionConfig {
        ConnectionConfig {
            db_type: self.db_type,
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password,
            database: self.database.clone(),
            schema_name: self.schema_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Generated,
    Executed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Generated => "generated",
            HistoryStatus::Executed => "executed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "generated" => Some(HistoryStatus::Generated),
            "executed" => Some(HistoryStatus::Executed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryHistoryRecord {
    pub id: HistoryId,
    pub user_id: String,
    pub natural_language_query: String,
    pub generated_sql: String,
    pub status: HistoryStatus,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn list_connections(&self, user_id: &str) -> Result<Vec<SavedConnection>, StoreError>;

    async fn get_connection(&self, user_id: &str, id: i64) -> Result<Option<SavedConnection>, StoreError>;

    async fn create_connection(
        &self,
        user_id: &str,
        name: &str,
        config: &ConnectionConfig,
    ) -> Result<SavedConnection, StoreError>;

    async fn update_connection(
        &self,
        user_id: &str,
        id: i64,
        name: &str,
        config: &ConnectionConfig,
    ) -> Result<SavedConnection, StoreError>;

    /// Removes the connection and its secret.
    async fn delete_connection(&self, user_id: &str, id: i64) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn password(&self, connection_id: i64) -> Result<Option<String>, StoreError>;

    async fn set_password(&self, connection_id: i64, password: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn insert_generated(
        &self,
        user_id: &str,
        natural_language_query: &str,
        generated_sql: &str,
    ) -> Result<HistoryId, StoreError>;

    /// Sets the status of an existing record to executed. `NotFound` when the id is unknown.
    async fn mark_executed(&self, id: HistoryId) -> Result<(), StoreError>;

    /// The user's records, newest first.
    async fn list_history(&self, user_id: &str) -> Result<Vec<QueryHistoryRecord>, StoreError>;
}
