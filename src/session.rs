//! Per-connection state.
//!
//! Each accepted connection owns a session: its authentication status and an
//! ephemeral validator handle bound to an in-memory database. The validator
//! lets the dispatcher surface engine syntax errors before a write is
//! replicated, without touching the real file.

use rusqlite::Connection;

use crate::error::ServerError;

/// Scratch handle used to prepare statements without executing them.
pub struct Validator {
    conn: Connection,
}

impl Validator {
    pub fn open() -> Result<Self, ServerError> {
        let conn = Connection::open_in_memory().map_err(ServerError::from_engine)?;
        Ok(Self { conn })
    }

    /// Prepare `sql` against the scratch database. Unknown-object errors
    /// (`no such table/view/index/…`) are tolerated: the scratch database is
    /// empty, so they say nothing about the statement itself.
    pub fn validate(&self, sql: &str) -> Result<(), ServerError> {
        match self.conn.prepare(sql) {
            Ok(_) => Ok(()),
            Err(err) => {
                let message = err.to_string();
                if message.starts_with("no such ") {
                    return Ok(());
                }
                Err(ServerError::Sql { message })
            }
        }
    }
}

/// State kept for the lifetime of one client connection.
pub struct Session {
    /// True once AUTH succeeded, or always when no secret is configured.
    pub authenticated: bool,
    validator: Validator,
}

impl Session {
    pub fn new(requires_auth: bool) -> Result<Self, ServerError> {
        Ok(Self {
            authenticated: !requires_auth,
            validator: Validator::open()?,
        })
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }
}
