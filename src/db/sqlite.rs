use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};

use super::{migrations::run_migrations, KeyValueStore};

/// Durable key/value namespace stored in a SQLite database file.
pub struct SqliteStore {
    conn: Connection,
    namespace: String,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    pub fn open(db_path: PathBuf, namespace: impl Into<String>) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let conn = Connection::open(&db_path).context("failed to open SQLite database")?;
        let store = Self::with_connection(conn, namespace, Some(db_path))?;

        if let Some(path) = store.path() {
            info!(
                "Durable store '{}' initialized at {}",
                store.namespace,
                path.display()
            );
        }
        Ok(store)
    }

    pub fn open_in_memory(namespace: impl Into<String>) -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("failed to open in-memory SQLite database")?;
        Self::with_connection(conn, namespace, None)
    }

    fn with_connection(
        mut conn: Connection,
        namespace: impl Into<String>,
        db_path: Option<PathBuf>,
    ) -> Result<Self> {
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            error!("Failed to enable WAL mode: {err}");
        }

        run_migrations(&mut conn).context("failed to run database migrations")?;

        Ok(Self {
            conn,
            namespace: namespace.into(),
            db_path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM kv_entries WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to read key {key}"))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO kv_entries (namespace, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(namespace, key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![self.namespace, key, value, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to write key {key}"))?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM kv_entries WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
            )
            .with_context(|| format!("failed to remove key {key}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_get_remove() {
        let mut store = SqliteStore::open_in_memory("durable").unwrap();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "one").unwrap();
        store.set("k", "two").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("two"));

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("aoitrack.sqlite3");

        {
            let mut store = SqliteStore::open(path.clone(), "durable").unwrap();
            store.set("taskData_P1_task1", "{}").unwrap();
        }

        let store = SqliteStore::open(path, "durable").unwrap();
        assert_eq!(store.get("taskData_P1_task1").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn namespaces_are_isolated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("aoitrack.sqlite3");

        let mut durable = SqliteStore::open(path.clone(), "durable").unwrap();
        durable.set("k", "durable").unwrap();

        let backup = SqliteStore::open(path, "backup").unwrap();
        assert_eq!(backup.get("k").unwrap(), None);
    }
}
