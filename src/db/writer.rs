//! The exclusive read-write binding to the database file.
//!
//! At most one writer exists per server; every log-entry application passes
//! through it. The handle owns the `__proc__` bookkeeping table and the WAL
//! checkpoint policy. All accesses that publish or collect the deterministic
//! cells happen while the caller holds the exclusive side of the apply lock.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::params;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use tracing::debug;
use tracing::warn;

use super::determinism::register_functions;
use super::determinism::DeterministicCells;
use super::drain;
use super::exec_collect;
use super::Rows;
use super::SqlExec;
use crate::error::ServerError;

/// Exclusive owner of the on-disk database file.
pub struct WriterDb {
    conn: Option<Connection>,
    path: PathBuf,
    cells: Arc<DeterministicCells>,
}

impl WriterDb {
    /// Open the file read-write, apply the journaling pragmas, and make sure
    /// the procedure table exists.
    pub fn open(path: &Path, cells: Arc<DeterministicCells>) -> Result<Self, ServerError> {
        let conn = Connection::open(path).map_err(ServerError::from_engine)?;
        register_functions(&conn, &cells)?;
        drain(&conn, "PRAGMA auto_vacuum=FULL")?;
        drain(&conn, "PRAGMA journal_mode=WAL")?;
        drain(&conn, "PRAGMA synchronous=off")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS __proc__ (
                name       TEXT PRIMARY KEY,
                script     TEXT
            );",
        )
        .map_err(ServerError::from_engine)?;
        debug!(path = %path.display(), "opened writer database");
        Ok(Self {
            conn: Some(conn),
            path: path.to_path_buf(),
            cells,
        })
    }

    /// Close the handle. Later operations fail with `database closed`.
    pub fn close(&mut self) -> Result<(), ServerError> {
        let conn = self.conn.take().ok_or(ServerError::DatabaseClosed)?;
        if let Err((conn, err)) = conn.close() {
            // Drop force-finalizes outstanding statements; the handle is
            // closed either way.
            warn!(error = %err, "writer close reported an error");
            drop(conn);
        }
        Ok(())
    }

    /// Reopen after a restore replaced the file.
    pub fn reopen(&mut self) -> Result<(), ServerError> {
        let reopened = WriterDb::open(&self.path, Arc::clone(&self.cells))?;
        self.conn = reopened.conn;
        Ok(())
    }

    pub fn conn(&self) -> Result<&Connection, ServerError> {
        self.conn.as_ref().ok_or(ServerError::DatabaseClosed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move every committed WAL frame into the main file and truncate the log.
    pub fn checkpoint_truncate(&self) -> Result<(), ServerError> {
        let conn = self.conn()?;
        let busy: i64 = conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| row.get(0))
            .map_err(ServerError::from_engine)?;
        if busy != 0 {
            return Err(ServerError::Sql {
                message: "wal checkpoint blocked".to_string(),
            });
        }
        Ok(())
    }

    /// Set the WAL auto-checkpoint threshold; `0` disables it.
    pub fn set_wal_autocheckpoint(&self, pages: i64) -> Result<(), ServerError> {
        drain(self.conn()?, &format!("PRAGMA wal_autocheckpoint={pages}"))
    }

    /// Upsert a stored procedure. Parameter binding keeps script text inert.
    pub fn proc_upsert(&self, name: &str, script: &str) -> Result<(), ServerError> {
        self.conn()?
            .execute(
                "INSERT INTO __proc__ (name, script) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET script=excluded.script",
                params![name, script],
            )
            .map_err(ServerError::from_engine)?;
        Ok(())
    }

    /// Fetch a stored procedure's script, or `None` when absent.
    pub fn proc_fetch(&self, name: &str) -> Result<Option<String>, ServerError> {
        self.conn()?
            .query_row(
                "SELECT script FROM __proc__ WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(ServerError::from_engine)
    }

    /// Delete a stored procedure by name; deleting an absent name succeeds.
    pub fn proc_delete(&self, name: &str) -> Result<(), ServerError> {
        self.conn()?
            .execute("DELETE FROM __proc__ WHERE name = ?1", params![name])
            .map_err(ServerError::from_engine)?;
        Ok(())
    }

    /// All stored procedure names in lexicographic order.
    pub fn proc_names(&self) -> Result<Vec<String>, ServerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT name FROM __proc__ ORDER BY name")
            .map_err(ServerError::from_engine)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(ServerError::from_engine)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(ServerError::from_engine)?;
        Ok(names)
    }
}

impl SqlExec for WriterDb {
    fn exec(&self, sql: &str) -> Result<Rows, ServerError> {
        exec_collect(self.conn()?, sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, WriterDb) {
        let dir = TempDir::new().unwrap();
        let cells = DeterministicCells::new();
        let db = WriterDb::open(&dir.path().join("sqlite.db"), cells).unwrap();
        (dir, db)
    }

    #[test]
    fn test_open_applies_wal_mode() {
        let (_dir, db) = open_temp();
        let mode: String = db
            .conn()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_close_then_exec_reports_closed() {
        let (_dir, mut db) = open_temp();
        db.close().unwrap();
        let err = db.exec("SELECT 1").unwrap_err();
        assert!(matches!(err, ServerError::DatabaseClosed));
        assert!(matches!(db.close(), Err(ServerError::DatabaseClosed)));
    }

    #[test]
    fn test_proc_table_roundtrip() {
        let (_dir, db) = open_temp();
        assert_eq!(db.proc_fetch("inc").unwrap(), None);
        db.proc_upsert("inc", "1 + 1").unwrap();
        assert_eq!(db.proc_fetch("inc").unwrap().as_deref(), Some("1 + 1"));
        db.proc_upsert("inc", "2 + 2").unwrap();
        assert_eq!(db.proc_fetch("inc").unwrap().as_deref(), Some("2 + 2"));
        db.proc_upsert("abc", "x").unwrap();
        assert_eq!(db.proc_names().unwrap(), vec!["abc", "inc"]);
        db.proc_delete("inc").unwrap();
        assert_eq!(db.proc_fetch("inc").unwrap(), None);
        db.proc_delete("inc").unwrap();
    }

    #[test]
    fn test_proc_upsert_hostile_name_is_inert() {
        let (_dir, db) = open_temp();
        let name = "x'; DROP TABLE __proc__; --";
        db.proc_upsert(name, "42").unwrap();
        assert_eq!(db.proc_fetch(name).unwrap().as_deref(), Some("42"));
    }

    #[test]
    fn test_checkpoint_truncate_empties_wal() {
        let (dir, db) = open_temp();
        db.exec("CREATE TABLE t (a INT)").unwrap();
        db.exec("INSERT INTO t VALUES (1)").unwrap();
        db.checkpoint_truncate().unwrap();
        let wal = dir.path().join("sqlite.db-wal");
        let len = std::fs::metadata(&wal).map(|m| m.len()).unwrap_or(0);
        assert_eq!(len, 0);
    }
}
