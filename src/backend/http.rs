use crate::backend::models::{
    ApiResponse, ContextBody, ContextRequest, ErrorBody, ExecuteBody, ExecuteRequest,
    ExtractedSchema, GenerateBody, GenerateRequest, GenerationOutput, RecommendationsBody,
    RecommendationsRequest, SchemaBody, SchemaRequest, TablesBody,
};
use crate::backend::{BackendError, QueryBackend};
use crate::config::BackendConfig;
use crate::session::{ConnectionConfig, ContextId, Row};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, info};

/// REST client for the NL-to-SQL service.
pub struct HttpBackend {
    client: reqwest::Client,
    api_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        if config.api_url.trim().is_empty() {
            return Err(BackendError::ConfigError(
                "API URL is required for the query backend".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    /// POSTs `body` to `path` and unwraps the `{success, detail}` envelope.
    /// Transport failures and non-success answers both come back as `BackendError`.
    async fn post<B, T>(&self, path: &str, body: &B, fallback: &str) -> Result<T, BackendError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.api_url, path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("Request to {} failed: {}", url, e);
                BackendError::ConnectionError(e.to_string())
            })?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| BackendError::ConnectionError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            error!("Backend {} responded with status code: {}", path, status);
            return Err(BackendError::ResponseError(error_detail(&response_text).unwrap_or_else(
                || format!("HTTP error! status: {}", status.as_u16()),
            )));
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&response_text).map_err(|e| {
            error!("Failed to parse backend response from {}: {}", path, e);
            BackendError::ResponseError(format!("Failed to parse backend response: {}", e))
        })?;

        if !envelope.success {
            let detail = envelope.detail.unwrap_or_else(|| fallback.to_string());
            info!("Backend {} reported failure: {}", path, detail);
            return Err(BackendError::ResponseError(detail));
        }

        Ok(envelope.body)
    }
}

fn error_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail? {
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl QueryBackend for HttpBackend {
    async fn extract_schema(
        &self,
        config: &ConnectionConfig,
        table_name: &str,
    ) -> Result<ExtractedSchema, BackendError> {
        let fallback = "Failed to fetch schema.";
        let body: SchemaBody = self
            .post("/connect", &SchemaRequest { connection: config, table_name }, fallback)
            .await?;
        body.schema
            .ok_or_else(|| BackendError::ResponseError(fallback.to_string()))
    }

    async fn list_tables(&self, config: &ConnectionConfig) -> Result<Vec<String>, BackendError> {
        let fallback = "Failed to list tables.";
        let body: TablesBody = self.post("/list_tables", config, fallback).await?;
        body.table_names
            .ok_or_else(|| BackendError::ResponseError(fallback.to_string()))
    }

    async fn create_context(
        &self,
        config: &ConnectionConfig,
        table_names: &[String],
    ) -> Result<ContextId, BackendError> {
        let fallback = "Failed to create multi-table context.";
        let request = ContextRequest {
            connection: config,
            table_names,
        };
        let body: ContextBody = self
            .post("/create_multitable_context", &request, fallback)
            .await?;
        match body.namespace_id {
            Some(id) if !id.trim().is_empty() => Ok(ContextId::new(id)),
            _ => Err(BackendError::ResponseError(fallback.to_string())),
        }
    }

    async fn recommendations(&self, context: &ContextId) -> Result<Vec<String>, BackendError> {
        let fallback = "Failed to fetch recommendations.";
        let request = RecommendationsRequest {
            namespace_id: context.as_str(),
        };
        let body: RecommendationsBody = self.post("/recommendations", &request, fallback).await?;
        body.recommendations
            .ok_or_else(|| BackendError::ResponseError(fallback.to_string()))
    }

    async fn generate_query(
        &self,
        context: &ContextId,
        question: &str,
    ) -> Result<GenerationOutput, BackendError> {
        let fallback = "Failed to generate SQL query.";
        let request = GenerateRequest {
            namespace_id: context.as_str(),
            query: question,
        };
        let body: GenerateBody = self.post("/query", &request, fallback).await?;
        match body.sql {
            Some(sql) if !sql.trim().is_empty() => Ok(GenerationOutput {
                sql,
                explanation: body.explanation,
                source_tables: body.source_tables.unwrap_or_default(),
            }),
            _ => Err(BackendError::ResponseError(fallback.to_string())),
        }
    }

    async fn execute_query(
        &self,
        config: &ConnectionConfig,
        table_name: &str,
        sql: &str,
    ) -> Result<Vec<Row>, BackendError> {
        let fallback = "Failed to execute SQL query.";
        let request = ExecuteRequest {
            connection: config,
            table_name,
            query: sql,
        };
        let body: ExecuteBody = self.post("/query_sql", &request, fallback).await?;
        body.data
            .ok_or_else(|| BackendError::ResponseError(fallback.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DbKind;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::{Value, json};

    async fn serve(router: Router) -> HttpBackend {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        HttpBackend::new(&BackendConfig {
            api_url: format!("http://{}/", addr),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            db_type: DbKind::Postgresql,
            host: "localhost".to_string(),
            port: 5432,
            username: "analyst".to_string(),
            password: "hunter2".to_string(),
            database: "sales".to_string(),
            schema_name: "public".to_string(),
        }
    }

    #[tokio::test]
    async fn list_tables_sends_connection_fields() {
        let router = Router::new().route(
            "/list_tables",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["ip"], "localhost");
                assert_eq!(body["db_type"], "postgresql");
                assert_eq!(body["password"], "hunter2");
                assert!(body.get("table_name").is_none());
                Json(json!({"success": true, "table_names": ["orders", "customers"]}))
            }),
        );
        let backend = serve(router).await;

        let tables = backend.list_tables(&config()).await.unwrap();
        assert_eq!(tables, vec!["orders", "customers"]);
    }

    #[tokio::test]
    async fn generate_query_reads_metadata() {
        let router = Router::new().route(
            "/query",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["namespace_id"], "ns-1");
                assert_eq!(body["query"], "total revenue by customer");
                Json(json!({
                    "success": true,
                    "sql": "SELECT 1",
                    "explanation": "sums revenue",
                    "source_tables": ["orders", "customers"]
                }))
            }),
        );
        let backend = serve(router).await;

        let out = backend
            .generate_query(&ContextId::new("ns-1"), "total revenue by customer")
            .await
            .unwrap();
        assert_eq!(out.sql, "SELECT 1");
        assert_eq!(out.explanation.as_deref(), Some("sums revenue"));
        assert_eq!(out.source_tables, vec!["orders", "customers"]);
    }

    #[tokio::test]
    async fn unsuccessful_envelope_surfaces_detail_verbatim() {
        let router = Router::new().route(
            "/query_sql",
            post(|| async {
                Json(json!({"success": false, "detail": "password authentication failed"}))
            }),
        );
        let backend = serve(router).await;

        let err = backend
            .execute_query(&config(), "orders", "SELECT 1")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::ResponseError("password authentication failed".to_string())
        );
    }

    #[tokio::test]
    async fn http_error_uses_fastapi_detail() {
        let router = Router::new().route(
            "/create_multitable_context",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"detail": "Schema extraction failed: no such table"})),
                )
            }),
        );
        let backend = serve(router).await;

        let err = backend
            .create_context(&config(), &["orders".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Schema extraction failed: no such table");
    }

    #[tokio::test]
    async fn missing_payload_on_success_is_an_error() {
        let router = Router::new().route(
            "/recommendations",
            post(|| async { Json(json!({"success": true})) }),
        );
        let backend = serve(router).await;

        let err = backend
            .recommendations(&ContextId::new("ns-1"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::ResponseError("Failed to fetch recommendations.".to_string())
        );
    }

    #[tokio::test]
    async fn unreachable_service_is_a_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = HttpBackend::new(&BackendConfig {
            api_url: format!("http://{}", addr),
            timeout_secs: 2,
        })
        .unwrap();
        let err = backend.list_tables(&config()).await.unwrap_err();
        assert!(matches!(err, BackendError::ConnectionError(_)));
    }
}
