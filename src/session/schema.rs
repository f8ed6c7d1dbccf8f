use crate::backend::models::ExtractedSchema;
use crate::backend::{BackendError, QueryBackend};
use crate::session::{ConnectionConfig, ContextId, ValidationError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Tables available under the configured schema, in backend order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TableCatalog {
    tables: Vec<String>,
}

impl TableCatalog {
    pub fn new(tables: Vec<String>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == table)
    }
}

/// A non-empty, de-duplicated set of table names, in the order chosen.
/// Names are passed to the backend as listed; typed names need not appear in
/// the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TableSelection(Vec<String>);

impl TableSelection {
    pub fn new<I, S>(tables: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selected: Vec<String> = Vec::new();
        for table in tables {
            let table = table.as_ref().trim();
            if table.is_empty() {
                continue;
            }
            if !selected.iter().any(|t| t == table) {
                selected.push(table.to_string());
            }
        }

        if selected.is_empty() {
            return Err(ValidationError::EmptySelection);
        }
        Ok(Self(selected))
    }

    pub fn tables(&self) -> &[String] {
        &self.0
    }

    /// The table sent where the backend still expects a single `table_name`.
    pub fn primary(&self) -> &str {
        &self.0[0]
    }
}

/// Lists tables and materializes multi-table query contexts on the backend.
pub struct SchemaContextBuilder {
    backend: Arc<dyn QueryBackend>,
}

impl SchemaContextBuilder {
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self { backend }
    }

    pub async fn list_tables(&self, config: &ConnectionConfig) -> Result<TableCatalog, BackendError> {
        let tables = self.backend.list_tables(config).await?;
        info!(
            "Found {} tables in {}.{}",
            tables.len(),
            config.database,
            config.schema_name
        );
        Ok(TableCatalog::new(tables))
    }

    pub async fn create_context(
        &self,
        config: &ConnectionConfig,
        selection: &TableSelection,
    ) -> Result<ContextId, BackendError> {
        debug!("Creating context for tables {:?}", selection.tables());
        let context = self
            .backend
            .create_context(config, selection.tables())
            .await?;
        info!(
            "Created context {} over {} tables",
            context,
            selection.tables().len()
        );
        Ok(context)
    }

    /// Column details for one table, through the single-table `/connect` call.
    pub async fn preview_schema(
        &self,
        config: &ConnectionConfig,
        table_name: &str,
    ) -> Result<ExtractedSchema, BackendError> {
        self.backend.extract_schema(config, table_name).await
    }
}
