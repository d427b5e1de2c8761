//! The deterministic clock/seed pair threaded through every replicated write.
//!
//! The engine's only sources of non-determinism are its time and random
//! builtins. Each connection overrides those builtins with scalar functions
//! that consult this shared pair, so a write replayed with the same machine
//! info produces identical bytes on every replica. Writes publish the pair
//! before applying and collect it after; reads snapshot and restore it so
//! they never perturb replicated state.

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

use crate::constants::RANDOMBLOB_MAX_BYTES;
use crate::error::ServerError;

/// Shared `(ts, seed)` state consulted by the overriding scalar functions.
///
/// `ts` is nanoseconds since the Unix epoch as stamped by the consensus
/// layer; `seed` is the running PRNG state advanced by `random()` calls.
#[derive(Debug, Default)]
pub struct DeterministicCells {
    ts: AtomicI64,
    seed: AtomicI64,
}

impl DeterministicCells {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Install the pair from replicated machine info before a write apply.
    pub fn publish(&self, ts: i64, seed: i64) {
        self.ts.store(ts, Ordering::SeqCst);
        self.seed.store(seed, Ordering::SeqCst);
    }

    /// Read the possibly-advanced pair back after a write apply.
    pub fn collect(&self) -> (i64, i64) {
        (self.ts.load(Ordering::SeqCst), self.seed.load(Ordering::SeqCst))
    }

    /// Begin-reader hook: copy another pair into this one. Reader handles
    /// carry private cells synced from the replicated pair at the start of
    /// each read, so read-side builtins never touch replicated state.
    pub fn sync_from(&self, other: &DeterministicCells) {
        let (ts, seed) = other.collect();
        self.publish(ts, seed);
    }

    /// Advance the seed one xorshift64* step and return the scrambled value.
    fn next_random(&self) -> i64 {
        let mut x = self.seed.load(Ordering::SeqCst) as u64;
        if x == 0 {
            // xorshift state must be nonzero; fixed odd constant keeps the
            // substitution deterministic across replicas.
            x = 0x9E37_79B9_7F4A_7C15;
        }
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.seed.store(x as i64, Ordering::SeqCst);
        x.wrapping_mul(0x2545_F491_4F6C_DD1D) as i64
    }

    fn unix_seconds(&self) -> i64 {
        self.ts.load(Ordering::SeqCst) / 1_000_000_000
    }

    fn unix_millis(&self) -> i64 {
        self.ts.load(Ordering::SeqCst) / 1_000_000
    }
}

/// Override the engine's nondeterministic builtins on `conn`.
///
/// Registered on the writer and on every reader handle, so the same SQL text
/// resolves to the same functions on every code path.
pub fn register_functions(conn: &Connection, cells: &Arc<DeterministicCells>) -> Result<(), ServerError> {
    let c = Arc::clone(cells);
    conn.create_scalar_function("random", 0, FunctionFlags::SQLITE_UTF8, move |_ctx| {
        Ok(c.next_random())
    })
    .map_err(ServerError::from_engine)?;

    let c = Arc::clone(cells);
    conn.create_scalar_function("randomblob", 1, FunctionFlags::SQLITE_UTF8, move |ctx| {
        let n: i64 = ctx.get(0)?;
        let n = n.clamp(1, RANDOMBLOB_MAX_BYTES) as usize;
        let mut blob = Vec::with_capacity(n);
        while blob.len() < n {
            let word = c.next_random().to_le_bytes();
            let take = word.len().min(n - blob.len());
            blob.extend_from_slice(&word[..take]);
        }
        Ok(blob)
    })
    .map_err(ServerError::from_engine)?;

    let c = Arc::clone(cells);
    conn.create_scalar_function("unixepoch", 0, FunctionFlags::SQLITE_UTF8, move |_ctx| {
        Ok(c.unix_seconds())
    })
    .map_err(ServerError::from_engine)?;

    let c = Arc::clone(cells);
    conn.create_scalar_function("unixepoch_ms", 0, FunctionFlags::SQLITE_UTF8, move |_ctx| {
        Ok(c.unix_millis())
    })
    .map_err(ServerError::from_engine)?;

    Ok(())
}
