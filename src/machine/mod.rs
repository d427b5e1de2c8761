//! The replicated SQL state machine.
//!
//! Committed log entries are applied here, under the exclusive side of the
//! readers-writer apply boundary, with the deterministic `(ts, seed)` pair
//! published before and collected after every write so all replicas produce
//! byte-identical database files. Reads run on pooled read-only handles under
//! the shared side of the boundary and leave the pair untouched.
//!
//! The boundary lock is not what makes readers safe (WAL mode already gives
//! them a consistent snapshot); it makes the apply edge observable so the
//! determinism bookkeeping and snapshot/restore can serialize against it.

mod payload;

pub use payload::Payload;

use std::fs;
use std::io;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;

use crate::constants::DB_FILENAME;
use crate::constants::DB_SUBDIR;
use crate::constants::WAL_AUTOCHECKPOINT_PAGES;
use crate::db::DeterministicCells;
use crate::db::ReaderPool;
use crate::db::Rows;
use crate::db::SqlExec;
use crate::db::WriterDb;
use crate::error::ServerError;
use crate::proc;
use crate::reply::Reply;

/// Replicated machine info: the determinism pair carried alongside the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    /// Nanoseconds since the Unix epoch, stamped monotonically by the leader.
    pub ts: i64,
    /// Running PRNG state; advanced by the engine's `random()` during writes.
    pub seed: i64,
}

/// State machine over the writer handle, the reader pool, and the cells.
pub struct SqlMachine {
    boundary: RwLock<()>,
    writer: Mutex<WriterDb>,
    readers: ReaderPool,
    cells: Arc<DeterministicCells>,
    db_dir: PathBuf,
}

impl SqlMachine {
    /// Open (or create) the database under `<data_dir>/db/` and build the
    /// reader pool against the same file.
    pub fn open(data_dir: &Path, reader_cap: usize) -> Result<Self, ServerError> {
        let db_dir = data_dir.join(DB_SUBDIR);
        fs::create_dir_all(&db_dir)?;
        let db_path = db_dir.join(DB_FILENAME);
        let cells = DeterministicCells::new();
        let writer = WriterDb::open(&db_path, Arc::clone(&cells))?;
        let readers = ReaderPool::new(&db_path, reader_cap);
        info!(path = %db_path.display(), "sql state machine ready");
        Ok(Self {
            boundary: RwLock::new(()),
            writer: Mutex::new(writer),
            readers,
            cells,
            db_dir,
        })
    }

    /// Periodic hook from the consensus layer: publish the current machine
    /// info so engine builtins agree with the replicated clock between writes.
    pub fn tick(&self, info: &MachineInfo) {
        self.cells.publish(info.ts, info.seed);
    }

    /// Apply one committed log entry. `info` is the replicated machine info
    /// for this entry; writes may advance it and the new value must be
    /// persisted with the entry by the caller.
    pub fn apply(&self, args: &[String], info: &mut MachineInfo) -> Result<Reply, ServerError> {
        let name = args.first().map(|a| a.to_lowercase()).unwrap_or_default();
        match name.as_str() {
            "$exec" if args.len() == 2 => self.apply_exec(&args[1], info),
            "proc" => self.apply_proc(args, info),
            _ => Err(ServerError::UnknownCommand { name }),
        }
    }

    /// `$EXEC`: the replicated write path.
    pub fn apply_exec(&self, raw: &str, info: &mut MachineInfo) -> Result<Reply, ServerError> {
        let payload = Payload::decode(raw)?;
        let _exclusive = self.boundary.write();
        let writer = self.writer.lock();
        self.cells.publish(info.ts, info.seed);
        let result = run_statements(&*writer, &payload);
        // The engine may have advanced the pair; replicas only stay identical
        // if the new value rides along with the log entry.
        let (ts, seed) = self.cells.collect();
        info.ts = ts;
        info.seed = seed;
        result.map(Reply::from_result_sets)
    }

    /// `$QUERY`: the local read path.
    pub fn apply_query(&self, raw: &str) -> Result<Reply, ServerError> {
        let payload = Payload::decode(raw)?;
        let reader = self.readers.take()?;
        let result = {
            let _shared = self.boundary.read();
            reader.sync_clock(&self.cells);
            run_statements(&reader, &payload)
        };
        self.readers.release(reader);
        result.map(Reply::from_result_sets)
    }

    /// Replicated `PROC` subcommands. `SET`, `DEL`, and `EXEC` mutate the
    /// database; `GET` and `LIST` are accepted here too so a log carrying
    /// them applies cleanly.
    pub fn apply_proc(&self, args: &[String], info: &mut MachineInfo) -> Result<Reply, ServerError> {
        if args.len() < 2 {
            return Err(ServerError::ProcArity);
        }
        match args[1].to_lowercase().as_str() {
            "set" => {
                if args.len() != 4 {
                    return Err(ServerError::ProcArity);
                }
                proc::compile_check(&args[3])?;
                let _exclusive = self.boundary.write();
                let writer = self.writer.lock();
                writer.proc_upsert(&args[2], &args[3])?;
                debug!(name = %args[2], "stored procedure set");
                Ok(Reply::ok())
            }
            "del" | "delete" => {
                if args.len() != 3 {
                    return Err(ServerError::ProcArity);
                }
                let _exclusive = self.boundary.write();
                let writer = self.writer.lock();
                writer.proc_delete(&args[2])?;
                Ok(Reply::ok())
            }
            "exec" => self.apply_proc_exec(args, info),
            "get" => {
                if args.len() != 3 {
                    return Err(ServerError::ProcArity);
                }
                Ok(match self.proc_get(&args[2])? {
                    Some(script) => Reply::Bulk(script),
                    None => Reply::Nil,
                })
            }
            "list" => {
                if args.len() != 2 {
                    return Err(ServerError::ProcArity);
                }
                Ok(Reply::Array(self.proc_list()?.into_iter().map(Reply::Bulk).collect()))
            }
            other => Err(ServerError::UnknownProcCommand {
                command: args[0].clone(),
                sub: other.to_string(),
            }),
        }
    }

    /// `PROC EXEC`: run a stored (or inline) script as one atomic write.
    fn apply_proc_exec(&self, args: &[String], info: &mut MachineInfo) -> Result<Reply, ServerError> {
        if args.len() < 3 {
            return Err(ServerError::ProcArity);
        }
        let name = &args[2];
        let (inline, proc_args) = if name == proc::INLINE_PROC {
            if args.len() < 4 {
                return Err(ServerError::ProcArity);
            }
            (Some(args[3].clone()), &args[4..])
        } else {
            (None, &args[3..])
        };

        let _exclusive = self.boundary.write();
        let writer = self.writer.lock();
        self.cells.publish(info.ts, info.seed);
        writer.exec("begin")?;
        let outcome = match fetch_and_run(&writer, name, inline, proc_args) {
            Ok(value) => writer.exec("end").map(|_| value),
            Err(err) => match writer.exec("rollback") {
                Ok(_) => Err(err),
                Err(rollback_err) => Err(rollback_err),
            },
        };
        let (ts, seed) = self.cells.collect();
        info.ts = ts;
        info.seed = seed;
        outcome
    }

    /// Write-locked read of one script, for the front-end's `PROC GET`.
    pub fn proc_get(&self, name: &str) -> Result<Option<String>, ServerError> {
        let _exclusive = self.boundary.write();
        let writer = self.writer.lock();
        writer.proc_fetch(name)
    }

    /// Write-locked read of all script names, for the front-end's `PROC LIST`.
    pub fn proc_list(&self) -> Result<Vec<String>, ServerError> {
        let _exclusive = self.boundary.write();
        let writer = self.writer.lock();
        writer.proc_names()
    }

    /// Force a full checkpoint and stream the database file into `sink`.
    /// Auto-checkpointing is suspended while the bytes go out so the file
    /// cannot move under the copy.
    pub fn snapshot(&self, sink: &mut dyn Write) -> Result<u64, ServerError> {
        let _exclusive = self.boundary.write();
        let writer = self.writer.lock();
        writer.set_wal_autocheckpoint(0)?;
        writer.checkpoint_truncate()?;
        let mut file = fs::File::open(writer.path())?;
        let bytes = io::copy(&mut file, sink)?;
        writer.set_wal_autocheckpoint(WAL_AUTOCHECKPOINT_PAGES)?;
        info!(bytes, "snapshot streamed");
        Ok(bytes)
    }

    /// Replace the database with snapshot bytes: close the writer, swap the
    /// directory, stream the new file, reopen. Errors here are fatal to the
    /// restore; the caller decides whether the process survives.
    pub fn restore(&self, source: &mut dyn Read) -> Result<(), ServerError> {
        let _exclusive = self.boundary.write();
        let mut writer = self.writer.lock();
        writer.close()?;
        // Idle readers still reference the old inode; drop them with it.
        self.readers.clear();
        fs::remove_dir_all(&self.db_dir)?;
        fs::create_dir_all(&self.db_dir)?;
        let path = self.db_dir.join(DB_FILENAME);
        let mut file = fs::File::create(&path)?;
        let bytes = io::copy(source, &mut file)?;
        file.sync_all()?;
        drop(file);
        writer.reopen()?;
        info!(bytes, path = %path.display(), "restored database from snapshot");
        Ok(())
    }
}

fn fetch_and_run(
    writer: &WriterDb,
    name: &str,
    inline: Option<String>,
    args: &[String],
) -> Result<Reply, ServerError> {
    let script = match inline {
        Some(script) => script,
        None => writer.proc_fetch(name)?.ok_or(ServerError::ProcNotFound)?,
    };
    proc::run(writer.conn()?, &script, args)
}

/// Execute a payload's statements in order against one handle, bracketing
/// them in a transaction when the payload calls for it. An explicit
/// transaction adds the empty-marker result sets at both ends of the
/// envelope.
fn run_statements(db: &dyn SqlExec, payload: &Payload) -> Result<Vec<Rows>, ServerError> {
    let wrap = payload.wraps();
    if wrap {
        db.exec("begin")?;
    }
    let mut sets = Vec::with_capacity(payload.stmts.len() + 2);
    for sql in &payload.stmts {
        match db.exec(sql) {
            Ok(rows) => sets.push(rows),
            Err(err) => {
                if wrap {
                    db.exec("rollback")?;
                }
                return Err(err);
            }
        }
    }
    if wrap {
        db.exec("end")?;
    }
    if payload.tx {
        sets.insert(0, Vec::new());
        sets.push(Vec::new());
    }
    Ok(sets)
}
