pub mod http;
pub mod models;

use crate::config::BackendConfig;
use crate::session::{ConnectionConfig, ContextId, Row};
use async_trait::async_trait;
use models::{ExtractedSchema, GenerationOutput};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Transport failure: the service could not be reached or the body was unreadable.
    ConnectionError(String),
    /// The service answered without success. The message is its `detail`, verbatim.
    ResponseError(String),
    ConfigError(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::ConnectionError(msg) => write!(f, "Backend connection error: {}", msg),
            BackendError::ResponseError(msg) => write!(f, "{}", msg),
            BackendError::ConfigError(msg) => write!(f, "Backend configuration error: {}", msg),
        }
    }
}

impl Error for BackendError {}

/// The NL-to-SQL and schema-introspection service.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn extract_schema(
        &self,
        config: &ConnectionConfig,
        table_name: &str,
    ) -> Result<ExtractedSchema, BackendError>;

    async fn list_tables(&self, config: &ConnectionConfig) -> Result<Vec<String>, BackendError>;

    async fn create_context(
        &self,
        config: &ConnectionConfig,
        table_names: &[String],
    ) -> Result<ContextId, BackendError>;

    async fn recommendations(&self, context: &ContextId) -> Result<Vec<String>, BackendError>;

    async fn generate_query(
        &self,
        context: &ContextId,
        question: &str,
    ) -> Result<GenerationOutput, BackendError>;

    async fn execute_query(
        &self,
        config: &ConnectionConfig,
        table_name: &str,
        sql: &str,
    ) -> Result<Vec<Row>, BackendError>;
}

pub fn backend_from_config(config: &BackendConfig) -> Result<Arc<dyn QueryBackend>, BackendError> {
    Ok(Arc::new(http::HttpBackend::new(config)?))
}
