use crate::backend::QueryBackend;
use crate::session::history::{HistoryLogger, HistoryTicket};
use crate::session::{ConnectionConfig, Row, ValidationError, WorkflowError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct QueryExecutionCoordinator {
    backend: Arc<dyn QueryBackend>,
    history: HistoryLogger,
}

impl QueryExecutionCoordinator {
    pub fn new(backend: Arc<dyn QueryBackend>, history: HistoryLogger) -> Self {
        Self { backend, history }
    }

    /// Run `sql` once against the user's database. When `correlation` is set
    /// the matching history record is promoted to executed in the background.
    pub async fn execute(
        &self,
        config: &ConnectionConfig,
        table_name: &str,
        sql: &str,
        correlation: Option<HistoryTicket>,
    ) -> Result<Vec<Row>, WorkflowError> {
        let sql = sql.trim();
        if sql.is_empty() {
            return Err(ValidationError::BlankSql.into());
        }

        let started = Instant::now();
        let rows = match self.backend.execute_query(config, table_name, sql).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Query execution failed after {:?}: {}", started.elapsed(), e);
                return Err(e.into());
            }
        };
        info!(
            "Executed query on {}.{} in {:?}, {} rows",
            config.database,
            config.schema_name,
            started.elapsed(),
            rows.len()
        );

        match correlation {
            Some(ticket) => {
                self.history.spawn_mark_executed(ticket);
            }
            None => debug!("Execution not correlated with a generated query"),
        }
        Ok(rows)
    }
}

/// Render rows as CSV; the header comes from the first row's columns.
pub fn rows_to_csv(rows: &[Row]) -> Result<String, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if let Some(first) = rows.first() {
        let headers: Vec<&str> = first.keys().map(String::as_str).collect();
        writer.write_record(&headers)?;
        for row in rows {
            let record: Vec<String> = headers
                .iter()
                .map(|column| row.get(*column).map(cell_text).unwrap_or_default())
                .collect();
            writer.write_record(&record)?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::HistoryStatus;
    use crate::session::testing::{FakeBackend, sample_config};
    use crate::store::memory::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn coordinator(backend: &Arc<FakeBackend>, store: &Arc<MemoryStore>) -> QueryExecutionCoordinator {
        QueryExecutionCoordinator::new(backend.clone(), HistoryLogger::new(store.clone()))
    }

    #[tokio::test]
    async fn blank_sql_is_rejected_locally() {
        let backend = Arc::new(FakeBackend::new());
        let store = Arc::new(MemoryStore::new());
        let result = coordinator(&backend, &store)
            .execute(&sample_config(), "orders", "  ", None)
            .await;
        assert!(matches!(
            result,
            Err(WorkflowError::Validation(ValidationError::BlankSql))
        ));
        assert_eq!(FakeBackend::calls(&backend.execute_calls), 0);
    }

    #[tokio::test]
    async fn correlated_success_marks_history() {
        let backend = Arc::new(FakeBackend::new());
        let store = Arc::new(MemoryStore::new());
        let logger = HistoryLogger::new(store.clone());
        let ticket = logger.spawn_record_generated(
            "alice".to_string(),
            "revenue".to_string(),
            "SELECT 1".to_string(),
        );

        let rows = coordinator(&backend, &store)
            .execute(&sample_config(), "orders", "SELECT 1", Some(ticket.clone()))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        ticket.id().await.unwrap();
        tokio::task::yield_now().await;
        for _ in 0..10 {
            if store.history_snapshot()[0].status == HistoryStatus::Executed {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.history_snapshot()[0].status, HistoryStatus::Executed);
    }

    #[tokio::test]
    async fn failure_is_reported_verbatim_without_retry() {
        let backend = Arc::new(FakeBackend::new());
        let store = Arc::new(MemoryStore::new());
        let mut config = sample_config();
        config.password.clear();

        let result = coordinator(&backend, &store)
            .execute(&config, "orders", "SELECT 1", None)
            .await;
        match result {
            Err(WorkflowError::Backend(e)) => assert_eq!(
                e.to_string(),
                "password authentication failed for user \"analyst\""
            ),
            other => panic!("expected backend error, got {:?}", other),
        }
        assert_eq!(FakeBackend::calls(&backend.execute_calls), 1);
        assert_eq!(store.mark_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn csv_keeps_column_order_and_quotes() {
        let mut row = Row::new();
        row.insert("name".to_string(), json!("Acme, Inc."));
        row.insert("revenue".to_string(), json!(10.5));
        row.insert("region".to_string(), Value::Null);

        let csv = rows_to_csv(&[row]).unwrap();
        assert_eq!(csv, "name,revenue,region\n\"Acme, Inc.\",10.5,\n");
    }
}
