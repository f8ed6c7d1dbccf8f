use duckdb::Connection;
use r2d2::ManageConnection;
use std::sync::{Mutex, PoisonError};

pub const IN_MEMORY: &str = ":memory:";

/// r2d2 manager handing out DuckDB connections to one database.
///
/// The database is opened once; pooled connections are clones of that root
/// connection so they share one instance (and one in-memory catalog).
pub struct DuckDBConnectionManager {
    root: Mutex<Connection>,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: String) -> Result<Self, duckdb::Error> {
        let root = if connection_string == IN_MEMORY {
            Connection::open_in_memory()?
        } else {
            Connection::open(&connection_string)?
        };
        Ok(Self {
            root: Mutex::new(root),
        })
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
        root.try_clone()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0))?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
