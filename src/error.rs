//! Server error taxonomy and wire formatting.
//!
//! One enum covers every failure a command can surface. Engine errors carry
//! the SQLite message verbatim; leadership errors keep their own wire prefix
//! so clients can redirect; everything else is prefixed `ERR ` by
//! [`ServerError::wire_message`].

use snafu::Snafu;

/// Errors surfaced by command handling, apply, and the protocol front-end.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServerError {
    /// A statement begins with a keyword outside the routing table.
    #[snafu(display("near \"{near}\": syntax error"))]
    Syntax {
        /// The offending leading keyword, lower-cased.
        near: String,
    },

    /// The splitter hit end-of-input inside a comment, quote, or bracket
    /// without producing any usable statement.
    #[snafu(display("incomplete input"))]
    IncompleteInput,

    /// Trailing content after a solo `BEGIN`/`END`/`COMMIT`/`ROLLBACK`.
    #[snafu(display("too much input"))]
    TooMuchInput,

    /// `BEGIN` while a transaction block is already open.
    #[snafu(display("nested transactions are not supported"))]
    NestedTransaction,

    /// `BEGIN` preceded by other statements in the same request.
    #[snafu(display("\"begin\" must be the first statement"))]
    BeginNotFirst,

    /// A statement follows `END`/`COMMIT`/`ROLLBACK` in the same request.
    #[snafu(display("\"end\" must be the last statement"))]
    EndNotLast,

    /// `END`/`COMMIT`/`ROLLBACK` without a preceding `BEGIN`.
    #[snafu(display("transaction not started"))]
    TransactionNotStarted,

    /// `BEGIN` block never closed within the request.
    #[snafu(display("missing \"end\" statement"))]
    MissingEnd,

    /// Error reported by the SQL engine, surfaced verbatim.
    #[snafu(display("{message}"))]
    Sql {
        /// The engine's error message.
        message: String,
    },

    /// Operation attempted on a closed database handle.
    #[snafu(display("database closed"))]
    DatabaseClosed,

    /// A replicated command payload failed to parse.
    #[snafu(display("invalid command payload: {message}"))]
    Payload { message: String },

    /// `PROC EXEC` named a procedure that is not stored.
    #[snafu(display("proc not found"))]
    ProcNotFound,

    /// A procedure script failed to compile.
    #[snafu(display("{message}"))]
    ProcCompile { message: String },

    /// A procedure script raised or threw at runtime.
    #[snafu(display("{message}"))]
    ProcRuntime { message: String },

    /// Bad arity for a `PROC` subcommand.
    #[snafu(display("wrong number of arguments, try PROC HELP"))]
    ProcArity,

    /// Unrecognized `PROC` subcommand.
    #[snafu(display("unknown proc command '{command} {sub}', try PROC HELP"))]
    UnknownProcCommand { command: String, sub: String },

    /// Reserved internal command sent directly by a client.
    #[snafu(display("unknown command '{name}'"))]
    UnknownCommand { name: String },

    /// Write received by a replica that is not the leader.
    #[snafu(display("node is not the leader"))]
    NotLeader,

    /// Redirect: the slot has moved to another node.
    #[snafu(display("MOVED {slot} {addr}"))]
    Moved { slot: u64, addr: String },

    /// Redirect: retry against the given node.
    #[snafu(display("TRY {addr}"))]
    TryAgain { addr: String },

    /// AUTH with a wrong secret.
    #[snafu(display("unauthorized"))]
    Unauthorized,

    /// Any command before a successful AUTH when a secret is configured.
    #[snafu(display("authentication required"))]
    AuthRequired,

    /// AUTH sent to a server with no secret configured.
    #[snafu(display("auth not enabled"))]
    AuthNotEnabled,

    /// Wrong number of arguments for an administrative command.
    #[snafu(display("wrong number of arguments"))]
    WrongNumberOfArguments,

    /// Malformed RESP input.
    #[snafu(display("protocol error: {message}"))]
    Protocol { message: String },

    /// Filesystem failure during snapshot, restore, or startup.
    #[snafu(display("io error: {source}"))]
    Io { source: std::io::Error },

    /// Invariant violation inside the server itself.
    #[snafu(display("internal error: {message}"))]
    Internal { message: String },
}

impl ServerError {
    /// Wrap an engine error, preserving its message verbatim.
    pub fn from_engine(err: rusqlite::Error) -> Self {
        ServerError::Sql { message: err.to_string() }
    }

    /// True for redirects the client resolves by reconnecting elsewhere.
    pub fn is_redirect(&self) -> bool {
        matches!(self, ServerError::Moved { .. } | ServerError::TryAgain { .. })
    }

    /// The error line as written to the wire. Leadership redirects keep
    /// their own prefix; everything else gets `ERR `.
    pub fn wire_message(&self) -> String {
        if self.is_redirect() {
            self.to_string()
        } else {
            format!("ERR {self}")
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(source: std::io::Error) -> Self {
        ServerError::Io { source }
    }
}
