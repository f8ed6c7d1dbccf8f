//! In-memory stores with failure switches, for exercising the session
//! components without DuckDB.

use crate::session::{ConnectionConfig, HistoryId};
use crate::store::{
    ConnectionStore, HistoryStatus, HistoryStore, QueryHistoryRecord, SavedConnection,
    SecretStore, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    connections: Mutex<Vec<SavedConnection>>,
    secrets: Mutex<HashMap<i64, String>>,
    history: Mutex<Vec<QueryHistoryRecord>>,
    pub fail_secrets: AtomicBool,
    pub fail_secret_writes: AtomicBool,
    pub secret_delay: Mutex<Option<Duration>>,
    pub fail_history: AtomicBool,
    pub mark_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn history_snapshot(&self) -> Vec<QueryHistoryRecord> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn list_connections(&self, user_id: &str) -> Result<Vec<SavedConnection>, StoreError> {
        Ok(self
            .connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_connection(
        &self,
        user_id: &str,
        id: i64,
    ) -> Result<Option<SavedConnection>, StoreError> {
        Ok(self
            .connections
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.user_id == user_id && c.id == id)
            .cloned())
    }

    async fn create_connection(
        &self,
        user_id: &str,
        name: &str,
        config: &ConnectionConfig,
    ) -> Result<SavedConnection, StoreError> {
        let saved = SavedConnection {
            id: self.next_id(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            db_type: config.db_type,
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            database: config.database.clone(),
            schema_name: config.schema_name.clone(),
            created_at: Utc::now(),
        };
        self.connections.lock().unwrap().push(saved.clone());
        Ok(saved)
    }

    async fn update_connection(
        &self,
        user_id: &str,
        id: i64,
        name: &str,
        config: &ConnectionConfig,
    ) -> Result<SavedConnection, StoreError> {
        let mut connections = self.connections.lock().unwrap();
        let saved = connections
            .iter_mut()
            .find(|c| c.user_id == user_id && c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("Connection {}", id)))?;
        saved.name = name.to_string();
        saved.db_type = config.db_type;
        saved.host = config.host.clone();
        saved.port = config.port;
        saved.username = config.username.clone();
        saved.database = config.database.clone();
        saved.schema_name = config.schema_name.clone();
        Ok(saved.clone())
    }

    async fn delete_connection(&self, user_id: &str, id: i64) -> Result<(), StoreError> {
        let mut connections = self.connections.lock().unwrap();
        let before = connections.len();
        connections.retain(|c| !(c.user_id == user_id && c.id == id));
        if connections.len() == before {
            return Err(StoreError::NotFound(format!("Connection {}", id)));
        }
        self.secrets.lock().unwrap().remove(&id);
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn password(&self, connection_id: i64) -> Result<Option<String>, StoreError> {
        let delay = *self.secret_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_secrets.load(Ordering::SeqCst) {
            return Err(StoreError::Database("secrets unavailable".to_string()));
        }
        Ok(self.secrets.lock().unwrap().get(&connection_id).cloned())
    }

    async fn set_password(&self, connection_id: i64, password: &str) -> Result<(), StoreError> {
        if self.fail_secret_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("secrets unavailable".to_string()));
        }
        self.secrets
            .lock()
            .unwrap()
            .insert(connection_id, password.to_string());
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn insert_generated(
        &self,
        user_id: &str,
        natural_language_query: &str,
        generated_sql: &str,
    ) -> Result<HistoryId, StoreError> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(StoreError::Database("history unavailable".to_string()));
        }
        let id = HistoryId(self.next_id());
        self.history.lock().unwrap().push(QueryHistoryRecord {
            id,
            user_id: user_id.to_string(),
            natural_language_query: natural_language_query.to_string(),
            generated_sql: generated_sql.to_string(),
            status: HistoryStatus::Generated,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn mark_executed(&self, id: HistoryId) -> Result<(), StoreError> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(StoreError::Database("history unavailable".to_string()));
        }
        let mut history = self.history.lock().unwrap();
        let record = history
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("History record {}", id)))?;
        record.status = HistoryStatus::Executed;
        Ok(())
    }

    async fn list_history(&self, user_id: &str) -> Result<Vec<QueryHistoryRecord>, StoreError> {
        let mut records: Vec<_> = self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.reverse();
        Ok(records)
    }
}
