pub mod migrations;
pub mod models;
pub mod queries;
mod store;

use anyhow::{Result, anyhow};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// SQLite-backed store. Constructed once at startup and handed down; there
/// is no global handle.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let db = Self::init(conn)?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Private, throwaway database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Flushes and closes the connection.
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        conn.close().map_err(|(_, e)| e)?;
        info!("Database closed");
        Ok(())
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Like [`with_conn`](Self::with_conn), for work that needs a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }
}
