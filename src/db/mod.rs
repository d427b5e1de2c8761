//! Database handles: the exclusive writer, the bounded reader pool, and the
//! deterministic cells their connections consult.
//!
//! Result shape: every statement yields a list of rows of string-coerced
//! column values. Statements that produce columns get the column-name header
//! as their first row; statements with no output columns yield an empty list.

mod determinism;
mod readers;
mod writer;

pub use determinism::register_functions;
pub use determinism::DeterministicCells;
pub use readers::ReaderDb;
pub use readers::ReaderPool;
pub use writer::WriterDb;

use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::error::ServerError;

/// Rows of one statement: string-coerced columns, header row first when the
/// statement has output columns.
pub type Rows = Vec<Vec<String>>;

/// Common execution surface of the writer and reader handles.
pub trait SqlExec {
    fn exec(&self, sql: &str) -> Result<Rows, ServerError>;
}

/// Prepare and step one statement, collecting string-coerced rows.
pub(crate) fn exec_collect(conn: &Connection, sql: &str) -> Result<Rows, ServerError> {
    let mut stmt = conn.prepare(sql).map_err(ServerError::from_engine)?;
    let ncols = stmt.column_count();
    let mut out: Rows = Vec::new();
    if ncols > 0 {
        out.push(stmt.column_names().iter().map(|c| c.to_string()).collect());
    }
    let mut rows = stmt.query([]).map_err(ServerError::from_engine)?;
    loop {
        match rows.next() {
            Ok(Some(row)) => {
                let mut cols = Vec::with_capacity(ncols);
                for i in 0..ncols {
                    let value = row.get_ref(i).map_err(ServerError::from_engine)?;
                    cols.push(column_text(value));
                }
                out.push(cols);
            }
            Ok(None) => break,
            Err(err) => return Err(ServerError::from_engine(err)),
        }
    }
    Ok(out)
}

/// Coerce one column value to text the way the engine's text conversion does;
/// NULL becomes the empty string.
fn column_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => String::from_utf8_lossy(b).into_owned(),
    }
}

/// Run a statement and discard any rows it returns. Used for pragmas, which
/// may or may not report a value depending on the key.
pub(crate) fn drain(conn: &Connection, sql: &str) -> Result<(), ServerError> {
    let mut stmt = conn.prepare(sql).map_err(ServerError::from_engine)?;
    let mut rows = stmt.query([]).map_err(ServerError::from_engine)?;
    while rows.next().map_err(ServerError::from_engine)?.is_some() {}
    Ok(())
}
