//! The guided NL-to-SQL session: connection resolution, table selection and
//! context creation, recommendations, generation, execution and history,
//! sequenced by [`workflow::WorkflowStateMachine`].

pub mod error;
pub mod execution;
pub mod generation;
pub mod history;
pub mod recommendations;
pub mod resolver;
pub mod schema;
pub mod workflow;

#[cfg(test)]
pub mod testing;

pub use error::{ResolutionError, ValidationError, WorkflowError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// One result row, column order preserved.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbKind {
    #[serde(alias = "postgres")]
    Postgresql,
    Mysql,
    Oracle,
    #[serde(alias = "sqlserver")]
    Mssql,
    Sqlite,
}

impl DbKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbKind::Postgresql => "postgresql",
            DbKind::Mysql => "mysql",
            DbKind::Oracle => "oracle",
            DbKind::Mssql => "mssql",
            DbKind::Sqlite => "sqlite",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Some(DbKind::Postgresql),
            "mysql" => Some(DbKind::Mysql),
            "oracle" => Some(DbKind::Oracle),
            "mssql" | "sqlserver" => Some(DbKind::Mssql),
            "sqlite" => Some(DbKind::Sqlite),
            _ => None,
        }
    }
}

impl fmt::Display for DbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection details for the user's database. Serializes to the backend's
/// wire shape (`ip` for the host). The password is kept out of `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub db_type: DbKind,
    #[serde(rename = "ip", alias = "host")]
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    pub schema_name: String,
}

impl ConnectionConfig {
    /// Every field except the password must be present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required = [
            ("ip", &self.host),
            ("username", &self.username),
            ("database", &self.database),
            ("schema_name", &self.schema_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::IncompleteConfig(field));
            }
        }
        if self.port == 0 {
            return Err(ValidationError::IncompleteConfig("port"));
        }
        Ok(())
    }

    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            db_type: self.db_type,
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            database: self.database.clone(),
            schema_name: self.schema_name.clone(),
            has_password: !self.password.is_empty(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("db_type", &self.db_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("schema_name", &self.schema_name)
            .finish()
    }
}

/// Password-free view of a [`ConnectionConfig`] for snapshots and responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSummary {
    pub db_type: DbKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub database: String,
    pub schema_name: String,
    pub has_password: bool,
}

/// Opaque backend namespace id for a materialized multi-table context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned id of a query history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryId(pub i64);

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SQL proposed by the backend for one natural-language question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedQuery {
    pub sql: String,
    pub explanation: Option<String>,
    pub source_tables: Vec<String>,
    pub question: String,
}
