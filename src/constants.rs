//! Fixed resource bounds for the server.
//!
//! Tiger Style: every pool, buffer, and queue has an explicit compile-time
//! bound so a misbehaving client cannot grow server state without limit.

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 11001;

/// Maximum read-only handles kept in the reader pool. Handles checked out
/// beyond the cap are closed on release instead of returned.
pub const READER_POOL_MAX: usize = 50;

/// WAL auto-checkpoint threshold, in pages, outside of snapshotting.
pub const WAL_AUTOCHECKPOINT_PAGES: i64 = 1000;

/// Maximum concurrent client connections.
pub const MAX_CONCURRENT_CONNECTIONS: usize = 1024;

/// Maximum size of a single request frame in bytes (64 MB). Bounds the
/// connection read buffer; a frame beyond this is a protocol error.
pub const MAX_REQUEST_SIZE: usize = 64 * 1024 * 1024;

/// Maximum nesting depth when exporting a script return value to a reply.
pub const MAX_SCRIPT_RESULT_DEPTH: usize = 32;

/// Maximum bytes a deterministic `randomblob(n)` call will produce.
pub const RANDOMBLOB_MAX_BYTES: i64 = 1_000_000;

/// Subdirectory of the data dir holding the database file.
pub const DB_SUBDIR: &str = "db";

/// Name of the database file inside [`DB_SUBDIR`].
pub const DB_FILENAME: &str = "sqlite.db";
