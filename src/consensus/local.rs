//! Single-node consensus: a strictly ordered in-process apply loop.
//!
//! Every proposed write is stamped with machine info the way a leader would
//! stamp a log entry (`ts` monotonic over wall-clock nanoseconds, `seed`
//! carried forward from the previous apply) and applied immediately. The
//! ordering lock is the stand-in for the single-threaded apply loop of a
//! real log.

use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::Consensus;
use crate::error::ServerError;
use crate::machine::MachineInfo;
use crate::machine::SqlMachine;
use crate::reply::Reply;

struct LogState {
    info: MachineInfo,
    applied_index: u64,
}

/// In-process, always-leader consensus over one [`SqlMachine`].
pub struct LocalConsensus {
    machine: Arc<SqlMachine>,
    state: Arc<Mutex<LogState>>,
}

impl LocalConsensus {
    pub fn new(machine: Arc<SqlMachine>) -> Self {
        let info = MachineInfo {
            ts: 0,
            seed: rand::random::<i64>(),
        };
        machine.tick(&info);
        Self {
            machine,
            state: Arc::new(Mutex::new(LogState { info, applied_index: 0 })),
        }
    }

    /// Machine info as of the last applied entry.
    pub fn machine_info(&self) -> MachineInfo {
        self.state.lock().info
    }

    pub fn applied_index(&self) -> u64 {
        self.state.lock().applied_index
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl Consensus for LocalConsensus {
    async fn propose(&self, command: Vec<String>) -> Result<Reply, ServerError> {
        let machine = Arc::clone(&self.machine);
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            let mut state = state.lock();
            state.applied_index += 1;
            let index = state.applied_index;
            // Leader stamp: strictly monotonic, never behind the wall clock.
            state.info.ts = (state.info.ts + 1).max(now_nanos());
            let mut info = state.info;
            let result = machine.apply(&command, &mut info);
            state.info = info;
            debug!(index, command = %command.first().map(String::as_str).unwrap_or(""), "applied log entry");
            result
        })
        .await
        .map_err(|err| ServerError::Internal {
            message: format!("apply task failed: {err}"),
        })?
    }
}
