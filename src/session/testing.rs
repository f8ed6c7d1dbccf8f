//! Scriptable in-process backend for session tests.

use crate::backend::models::{ExtractedSchema, GenerationOutput, SchemaColumn};
use crate::backend::{BackendError, QueryBackend};
use crate::session::{ConnectionConfig, ContextId, DbKind, Row};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn sample_config() -> ConnectionConfig {
    ConnectionConfig {
        db_type: DbKind::Postgresql,
        host: "10.0.0.5".to_string(),
        port: 5432,
        username: "analyst".to_string(),
        password: "s3cret".to_string(),
        database: "sales".to_string(),
        schema_name: "public".to_string(),
    }
}

pub const GENERATED_SQL: &str = "SELECT c.name, SUM(o.amount) AS revenue FROM orders o JOIN customers c ON c.id = o.customer_id GROUP BY c.name";

#[derive(Default)]
pub struct FakeBackend {
    pub tables: Mutex<Vec<String>>,
    pub list_calls: AtomicUsize,
    pub context_calls: AtomicUsize,
    pub recommendation_calls: AtomicUsize,
    pub generate_calls: AtomicUsize,
    pub execute_calls: AtomicUsize,
    pub fail_list: Mutex<Option<BackendError>>,
    pub fail_context: Mutex<Option<BackendError>>,
    pub fail_recommendations: Mutex<Option<BackendError>>,
    pub fail_generate: Mutex<Option<BackendError>>,
    /// Per-call delays for `list_tables`, consumed in call order.
    pub list_delays: Mutex<VecDeque<Duration>>,
    /// Per-call delays for `create_context`, consumed in call order.
    pub context_delays: Mutex<VecDeque<Duration>>,
    pub generate_delay: Mutex<Option<Duration>>,
    pub execute_delay: Mutex<Option<Duration>>,
    pub raw_sql: Mutex<Option<String>>,
    contexts: Mutex<HashMap<ContextId, Vec<String>>>,
    pub executed: Mutex<Vec<(String, String)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        *backend.tables.lock().unwrap() = vec!["orders".to_string(), "customers".to_string()];
        backend
    }

    pub fn context_tables(&self, context: &ContextId) -> Option<Vec<String>> {
        self.contexts.lock().unwrap().get(context).cloned()
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryBackend for FakeBackend {
    async fn extract_schema(
        &self,
        _config: &ConnectionConfig,
        table_name: &str,
    ) -> Result<ExtractedSchema, BackendError> {
        let mut schema = ExtractedSchema::new();
        schema.insert(
            table_name.to_string(),
            vec![SchemaColumn {
                table_name: table_name.to_string(),
                column_name: "id".to_string(),
                data_type: "integer".to_string(),
                is_nullable: "NO".to_string(),
                character_maximum_length: None,
                numeric_precision: Some(32),
                numeric_scale: Some(0),
                constraint_type: Some("PRIMARY KEY".to_string()),
                column_default: None,
            }],
        );
        Ok(schema)
    }

    async fn list_tables(&self, _config: &ConnectionConfig) -> Result<Vec<String>, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.list_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.fail_list.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.tables.lock().unwrap().clone())
    }

    async fn create_context(
        &self,
        _config: &ConnectionConfig,
        table_names: &[String],
    ) -> Result<ContextId, BackendError> {
        let call = self.context_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.context_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.fail_context.lock().unwrap().clone() {
            return Err(err);
        }
        let context = ContextId::new(format!("ns-{}", call));
        self.contexts
            .lock()
            .unwrap()
            .insert(context.clone(), table_names.to_vec());
        Ok(context)
    }

    async fn recommendations(&self, context: &ContextId) -> Result<Vec<String>, BackendError> {
        self.recommendation_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_recommendations.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(vec![
            format!("Top customers in {}", context),
            format!("Monthly revenue in {}", context),
        ])
    }

    async fn generate_query(
        &self,
        context: &ContextId,
        _question: &str,
    ) -> Result<GenerationOutput, BackendError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.generate_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.fail_generate.lock().unwrap().clone() {
            return Err(err);
        }
        let sql = self
            .raw_sql
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| GENERATED_SQL.to_string());
        Ok(GenerationOutput {
            sql,
            explanation: Some("Joins orders to customers".to_string()),
            source_tables: self.context_tables(context).unwrap_or_default(),
        })
    }

    async fn execute_query(
        &self,
        config: &ConnectionConfig,
        table_name: &str,
        sql: &str,
    ) -> Result<Vec<Row>, BackendError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.execute_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if config.password.is_empty() {
            return Err(BackendError::ResponseError(format!(
                "password authentication failed for user \"{}\"",
                config.username
            )));
        }
        self.executed
            .lock()
            .unwrap()
            .push((table_name.to_string(), sql.to_string()));

        let mut row = Row::new();
        row.insert("name".to_string(), json!("Acme"));
        row.insert("revenue".to_string(), json!(1200.5));
        Ok(vec![row])
    }
}
