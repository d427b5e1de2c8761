//! The consensus hook seam.
//!
//! The replication layer itself (log transport, leader election, membership)
//! lives outside this crate. What the server needs from it is narrow: submit
//! a write command, wait until it is committed and applied, and get the
//! machine's reply back — or a leadership error the client can follow to the
//! right node. A production deployment plugs a real consensus engine into
//! this trait; [`local::LocalConsensus`] is the single-node implementation
//! used standalone and in tests.

mod local;

pub use local::LocalConsensus;

use async_trait::async_trait;

use crate::error::ServerError;
use crate::reply::Reply;

/// Submission surface the protocol front-end drives.
#[async_trait]
pub trait Consensus: Send + Sync {
    /// Replicate `command`, apply it, and return the machine's reply.
    ///
    /// Returns `NotLeader`, `Moved`, or `TryAgain` when this node cannot
    /// commit the entry; those pass to the client verbatim so it can
    /// redirect.
    async fn propose(&self, command: Vec<String>) -> Result<Reply, ServerError>;
}
