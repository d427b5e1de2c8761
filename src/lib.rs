//! Tanoak: a replicated SQLite server behind a Redis-compatible protocol.
//!
//! Clients send SQL statements, stored-procedure directives, and
//! administrative commands over RESP. The dispatcher classifies each request
//! and rewrites it into one of two internal primitives: `$EXEC`, replicated
//! through the consensus log and applied under the writer's exclusive lock,
//! or `$QUERY`, served locally from a pooled read-only handle under the
//! shared lock. A deterministic `(ts, seed)` pair rides along with every
//! write so all replicas produce byte-identical database files.
//!
//! ```text
//! client ──RESP──► server ──► dispatcher ──► $EXEC ──► consensus ──► machine ──► writer db
//!                                └─────────► $QUERY ───────────────► machine ──► reader pool
//! ```
//!
//! The consensus layer itself is external; see [`consensus::Consensus`] for
//! the seam and [`consensus::LocalConsensus`] for the single-node stand-in.

pub mod config;
pub mod consensus;
pub mod constants;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod machine;
pub mod proc;
pub mod reply;
pub mod server;
pub mod session;
pub mod sql;

pub use config::ServerConfig;
pub use consensus::Consensus;
pub use consensus::LocalConsensus;
pub use error::ServerError;
pub use machine::MachineInfo;
pub use machine::SqlMachine;
pub use reply::Reply;
pub use server::Server;
