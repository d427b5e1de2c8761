//! Bounded pool of read-only handles against the writer's file.
//!
//! Handles are fungible: checked out per read request, returned on release,
//! and closed instead of returned once the free list is at capacity. Only the
//! free list is locked; a checked-out handle is owned by its borrower.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use tracing::trace;

use super::determinism::register_functions;
use super::determinism::DeterministicCells;
use super::drain;
use super::exec_collect;
use super::Rows;
use super::SqlExec;
use crate::error::ServerError;

/// One read-only binding to the database file.
///
/// Each handle owns private determinism cells: its time and random builtins
/// read a per-read copy of the replicated pair, never the pair itself, so a
/// read is side-effect-free for the replicated machine.
pub struct ReaderDb {
    conn: Connection,
    cells: Arc<DeterministicCells>,
}

impl ReaderDb {
    fn open(path: &Path) -> Result<Self, ServerError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(ServerError::from_engine)?;
        let cells = DeterministicCells::new();
        register_functions(&conn, &cells)?;
        drain(&conn, "PRAGMA query_only=1")?;
        Ok(Self { conn, cells })
    }

    /// Begin-reader hook: align this handle's clock with the replicated pair.
    pub fn sync_clock(&self, shared: &DeterministicCells) {
        self.cells.sync_from(shared);
    }
}

impl SqlExec for ReaderDb {
    fn exec(&self, sql: &str) -> Result<Rows, ServerError> {
        exec_collect(&self.conn, sql)
    }
}

/// Free list of reader handles, bounded by `cap`.
pub struct ReaderPool {
    path: PathBuf,
    free: Mutex<Vec<ReaderDb>>,
    cap: usize,
}

impl ReaderPool {
    pub fn new(path: &Path, cap: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            free: Mutex::new(Vec::new()),
            cap,
        }
    }

    /// Check out a handle, opening a fresh one when the free list is empty.
    pub fn take(&self) -> Result<ReaderDb, ServerError> {
        if let Some(db) = self.free.lock().pop() {
            trace!("reader handle reused from pool");
            return Ok(db);
        }
        ReaderDb::open(&self.path)
    }

    /// Return a handle, or close it when the pool is saturated.
    pub fn release(&self, db: ReaderDb) {
        let mut free = self.free.lock();
        if free.len() < self.cap {
            free.push(db);
        }
        // Dropping past capacity closes the connection.
    }

    /// Drop every idle handle. Used on restore, when pooled handles still
    /// reference the replaced file.
    pub fn clear(&self) {
        self.free.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.free.lock().len()
    }
}
