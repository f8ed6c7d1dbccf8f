use crate::session::{ConnectionConfig, DbKind, HistoryId};
use crate::store::db_pool::DuckDBConnectionManager;
use crate::store::{
    ConnectionStore, HistoryStatus, HistoryStore, QueryHistoryRecord, SavedConnection,
    SecretStore, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::{Connection, params};
use r2d2::Pool;
use tracing::{debug, info};

const SCHEMA_SQL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS connections_id_seq START 1;
CREATE TABLE IF NOT EXISTS connections (
    id BIGINT PRIMARY KEY DEFAULT nextval('connections_id_seq'),
    user_id VARCHAR NOT NULL,
    name VARCHAR NOT NULL,
    db_type VARCHAR NOT NULL,
    host VARCHAR NOT NULL,
    port INTEGER NOT NULL,
    username VARCHAR NOT NULL,
    database_name VARCHAR NOT NULL,
    schema_name VARCHAR NOT NULL,
    created_at VARCHAR NOT NULL
);
CREATE TABLE IF NOT EXISTS secrets (
    connection_id BIGINT PRIMARY KEY,
    password VARCHAR NOT NULL
);
CREATE SEQUENCE IF NOT EXISTS query_history_id_seq START 1;
CREATE TABLE IF NOT EXISTS query_history (
    id BIGINT PRIMARY KEY DEFAULT nextval('query_history_id_seq'),
    user_id VARCHAR NOT NULL,
    natural_language_query VARCHAR NOT NULL,
    generated_sql VARCHAR NOT NULL,
    status VARCHAR NOT NULL,
    created_at VARCHAR NOT NULL
);
"#;

const CONNECTION_COLUMNS: &str =
    "id, user_id, name, db_type, host, port, username, database_name, schema_name, created_at";

/// DuckDB-backed implementation of the connection, secret and history stores.
pub struct DuckStore {
    pool: Pool<DuckDBConnectionManager>,
}

impl DuckStore {
    /// Builds the pool and makes sure the tables exist.
    pub fn open(connection_string: &str, pool_size: u32) -> Result<Self, StoreError> {
        let manager = DuckDBConnectionManager::new(connection_string.to_string())?;
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let conn = pool.get().map_err(|e| StoreError::Pool(e.to_string()))?;
        conn.execute_batch(SCHEMA_SQL)?;
        info!("Store schema ready at {}", connection_string);

        drop(conn);
        Ok(Self { pool })
    }

    /// Runs blocking DuckDB work off the async executor.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| StoreError::Pool(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn now_text() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("Invalid timestamp '{}': {}", value, e)))
}

struct ConnectionRow {
    id: i64,
    user_id: String,
    name: String,
    db_type: String,
    host: String,
    port: i32,
    username: String,
    database: String,
    schema_name: String,
    created_at: String,
}

impl ConnectionRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            db_type: row.get(3)?,
            host: row.get(4)?,
            port: row.get(5)?,
            username: row.get(6)?,
            database: row.get(7)?,
            schema_name: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_saved(self) -> Result<SavedConnection, StoreError> {
        let db_type = DbKind::parse(&self.db_type).ok_or_else(|| {
            StoreError::Database(format!("Unknown database type '{}'", self.db_type))
        })?;
        let port = u16::try_from(self.port)
            .map_err(|_| StoreError::Database(format!("Invalid port {}", self.port)))?;

        Ok(SavedConnection {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            db_type,
            host: self.host,
            port,
            username: self.username,
            database: self.database,
            schema_name: self.schema_name,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn fetch_connection(
    conn: &Connection,
    user_id: &str,
    id: i64,
) -> Result<Option<SavedConnection>, StoreError> {
    let sql = format!(
        "SELECT {} FROM connections WHERE id = ? AND user_id = ?",
        CONNECTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![id, user_id], ConnectionRow::from_row)?;
    match rows.next() {
        Some(row) => Ok(Some(row?.into_saved()?)),
        None => Ok(None),
    }
}

#[async_trait]
impl ConnectionStore for DuckStore {
    async fn list_connections(&self, user_id: &str) -> Result<Vec<SavedConnection>, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM connections WHERE user_id = ? ORDER BY id",
                CONNECTION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![user_id], ConnectionRow::from_row)?;

            let mut connections = Vec::new();
            for row in rows {
                connections.push(row?.into_saved()?);
            }
            Ok(connections)
        })
        .await
    }

    async fn get_connection(
        &self,
        user_id: &str,
        id: i64,
    ) -> Result<Option<SavedConnection>, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| fetch_connection(conn, &user_id, id))
            .await
    }

    async fn create_connection(
        &self,
        user_id: &str,
        name: &str,
        config: &ConnectionConfig,
    ) -> Result<SavedConnection, StoreError> {
        let user_id = user_id.to_string();
        let name = name.to_string();
        let config = config.clone();
        self.with_conn(move |conn| {
            let id: i64 = conn.query_row(
                "INSERT INTO connections (user_id, name, db_type, host, port, username, database_name, schema_name, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
                params![
                    user_id,
                    name,
                    config.db_type.as_str(),
                    config.host,
                    config.port as i32,
                    config.username,
                    config.database,
                    config.schema_name,
                    now_text(),
                ],
                |row| row.get(0),
            )?;
            debug!("Created connection {} for user {}", id, user_id);

            fetch_connection(conn, &user_id, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Connection {}", id)))
        })
        .await
    }

    async fn update_connection(
        &self,
        user_id: &str,
        id: i64,
        name: &str,
        config: &ConnectionConfig,
    ) -> Result<SavedConnection, StoreError> {
        let user_id = user_id.to_string();
        let name = name.to_string();
        let config = config.clone();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE connections SET name = ?, db_type = ?, host = ?, port = ?, username = ?, database_name = ?, schema_name = ?
                 WHERE id = ? AND user_id = ?",
                params![
                    name,
                    config.db_type.as_str(),
                    config.host,
                    config.port as i32,
                    config.username,
                    config.database,
                    config.schema_name,
                    id,
                    user_id,
                ],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("Connection {}", id)));
            }

            fetch_connection(conn, &user_id, id)?
                .ok_or_else(|| StoreError::NotFound(format!("Connection {}", id)))
        })
        .await
    }

    async fn delete_connection(&self, user_id: &str, id: i64) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM connections WHERE id = ? AND user_id = ?",
                params![id, user_id],
            )?;
            if deleted == 0 {
                return Err(StoreError::NotFound(format!("Connection {}", id)));
            }
            conn.execute("DELETE FROM secrets WHERE connection_id = ?", params![id])?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl SecretStore for DuckStore {
    async fn password(&self, connection_id: i64) -> Result<Option<String>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT password FROM secrets WHERE connection_id = ?")?;
            let mut rows = stmt.query_map(params![connection_id], |row| row.get::<_, String>(0))?;
            match rows.next() {
                Some(password) => Ok(Some(password?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn set_password(&self, connection_id: i64, password: &str) -> Result<(), StoreError> {
        let password = password.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO secrets (connection_id, password) VALUES (?, ?)",
                params![connection_id, password],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl HistoryStore for DuckStore {
    async fn insert_generated(
        &self,
        user_id: &str,
        natural_language_query: &str,
        generated_sql: &str,
    ) -> Result<HistoryId, StoreError> {
        let user_id = user_id.to_string();
        let nl = natural_language_query.to_string();
        let sql = generated_sql.to_string();
        self.with_conn(move |conn| {
            let id: i64 = conn.query_row(
                "INSERT INTO query_history (user_id, natural_language_query, generated_sql, status, created_at)
                 VALUES (?, ?, ?, ?, ?) RETURNING id",
                params![user_id, nl, sql, HistoryStatus::Generated.as_str(), now_text()],
                |row| row.get(0),
            )?;
            Ok(HistoryId(id))
        })
        .await
    }

    async fn mark_executed(&self, id: HistoryId) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE query_history SET status = ? WHERE id = ?",
                params![HistoryStatus::Executed.as_str(), id.0],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("History record {}", id)));
            }
            Ok(())
        })
        .await
    }

    async fn list_history(&self, user_id: &str) -> Result<Vec<QueryHistoryRecord>, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, natural_language_query, generated_sql, status, created_at
                 FROM query_history WHERE user_id = ? ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, user_id, nl, sql, status, created_at) = row?;
                let status = HistoryStatus::parse(&status).ok_or_else(|| {
                    StoreError::Database(format!("Unknown history status '{}'", status))
                })?;
                records.push(QueryHistoryRecord {
                    id: HistoryId(id),
                    user_id,
                    natural_language_query: nl,
                    generated_sql: sql,
                    status,
                    created_at: parse_timestamp(&created_at)?,
                });
            }
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::db_pool::IN_MEMORY;

    fn store() -> DuckStore {
        DuckStore::open(IN_MEMORY, 4).unwrap()
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            db_type: DbKind::Postgresql,
            host: "localhost".to_string(),
            port: 5432,
            username: "analyst".to_string(),
            password: "ignored-here".to_string(),
            database: "sales".to_string(),
            schema_name: "public".to_string(),
        }
    }

    #[tokio::test]
    async fn connections_are_scoped_to_their_owner() {
        let store = store();
        let saved = store
            .create_connection("alice", "Sales DB", &config())
            .await
            .unwrap();
        assert_eq!(saved.name, "Sales DB");
        assert_eq!(saved.port, 5432);

        assert_eq!(store.list_connections("alice").await.unwrap().len(), 1);
        assert!(store.list_connections("bob").await.unwrap().is_empty());
        assert!(store.get_connection("bob", saved.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_and_delete_connection() {
        let store = store();
        let saved = store
            .create_connection("alice", "Sales DB", &config())
            .await
            .unwrap();
        store.set_password(saved.id, "pw").await.unwrap();

        let mut changed = config();
        changed.database = "warehouse".to_string();
        let updated = store
            .update_connection("alice", saved.id, "Warehouse", &changed)
            .await
            .unwrap();
        assert_eq!(updated.database, "warehouse");
        assert_eq!(updated.name, "Warehouse");

        let err = store
            .update_connection("bob", saved.id, "x", &changed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        store.delete_connection("alice", saved.id).await.unwrap();
        assert!(store.get_connection("alice", saved.id).await.unwrap().is_none());
        assert_eq!(store.password(saved.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_password_replaces_existing_secret() {
        let store = store();
        store.set_password(7, "first").await.unwrap();
        store.set_password(7, "second").await.unwrap();
        assert_eq!(store.password(7).await.unwrap().as_deref(), Some("second"));
        assert_eq!(store.password(8).await.unwrap(), None);
    }

    #[tokio::test]
    async fn generated_record_is_promoted_in_place() {
        let store = store();
        let id = store
            .insert_generated("alice", "total revenue by customer", "SELECT 1")
            .await
            .unwrap();

        store.mark_executed(id).await.unwrap();
        store.mark_executed(id).await.unwrap();

        let records = store.list_history("alice").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, id);
        assert_eq!(records[0].status, HistoryStatus::Executed);
        assert_eq!(records[0].natural_language_query, "total revenue by customer");
        assert_eq!(records[0].generated_sql, "SELECT 1");
    }

    #[tokio::test]
    async fn marking_unknown_record_is_not_found() {
        let store = store();
        let err = store.mark_executed(HistoryId(999)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let store = store();
        let first = store.insert_generated("alice", "a", "SELECT 1").await.unwrap();
        let second = store.insert_generated("alice", "b", "SELECT 2").await.unwrap();

        let ids: Vec<_> = store
            .list_history("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![second, first]);
    }
}
