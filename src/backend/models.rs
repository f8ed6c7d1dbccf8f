use crate::session::{ConnectionConfig, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Request bodies

#[derive(Debug, Serialize)]
pub struct SchemaRequest<'a> {
    #[serde(flatten)]
    pub connection: &'a ConnectionConfig,
    pub table_name: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ContextRequest<'a> {
    #[serde(flatten)]
    pub connection: &'a ConnectionConfig,
    pub table_names: &'a [String],
}

#[derive(Debug, Serialize)]
pub struct RecommendationsRequest<'a> {
    pub namespace_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub namespace_id: &'a str,
    pub query: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ExecuteRequest<'a> {
    #[serde(flatten)]
    pub connection: &'a ConnectionConfig,
    pub table_name: &'a str,
    pub query: &'a str,
}

// Response bodies. Every endpoint answers `{success, detail?, ...payload}`.

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(flatten)]
    pub body: T,
}

/// FastAPI-style error body returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct SchemaBody {
    pub schema: Option<ExtractedSchema>,
}

#[derive(Debug, Deserialize)]
pub struct TablesBody {
    pub table_names: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ContextBody {
    pub namespace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecommendationsBody {
    pub recommendations: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub sql: Option<String>,
    pub explanation: Option<String>,
    pub source_tables: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    pub data: Option<Vec<Row>>,
}

// Domain-facing shapes

/// Column metadata as reported by the introspection service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaColumn {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: String,
    #[serde(default)]
    pub character_maximum_length: Option<i64>,
    #[serde(default)]
    pub numeric_precision: Option<i64>,
    #[serde(default)]
    pub numeric_scale: Option<i64>,
    #[serde(default)]
    pub constraint_type: Option<String>,
    #[serde(default)]
    pub column_default: Option<String>,
}

/// Table name -> columns.
pub type ExtractedSchema = BTreeMap<String, Vec<SchemaColumn>>;

// Output from SQL generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationOutput {
    pub sql: String,
    pub explanation: Option<String>,
    pub source_tables: Vec<String>,
}
