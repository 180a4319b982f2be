//! Engine-level snapshot and restore with BLAKE3 hashing.
//!
//! Provides [`EngineSnapshot`] -- a serializable copy of the full simulation
//! state (entities, clock, id counter, seed, pending delayed effects) plus
//! the tick counter and step, with a BLAKE3 content hash for integrity
//! checks and determinism testing.
//!
//! Because delayed effects are stored as descriptors rather than closures,
//! the pending list is captured like any other data.
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//! use tessera_engine::prelude::*;
//!
//! #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Score { points: u32 }
//!
//! struct Game;
//!
//! impl Model for Game {
//!     type World = Score;
//!     type Delayed = ();
//!     type Effect = ();
//!     fn materialize(_: &()) -> Change<Self> { Change::Empty }
//! }
//!
//! let mut tick_loop = TickLoop::new(State::<Game>::new(Score::default(), 5), TickConfig::default());
//! tick_loop.add_producer("score", |_| Change::<Game>::transform(|s| s.world_mut().points += 1));
//! tick_loop.run_ticks(10);
//!
//! let snapshot = tick_loop.capture_snapshot().unwrap();
//! assert_eq!(snapshot.tick_counter, 10);
//! assert_eq!(snapshot.hash.len(), 64); // BLAKE3 hex digest
//!
//! tick_loop.run_ticks(10);
//! tick_loop.restore_from_snapshot(&snapshot).unwrap();
//! assert_eq!(tick_loop.tick_count(), 10);
//! assert_eq!(tick_loop.state().world().points, 10);
//! ```
//!
//! # What Is NOT Serialized
//!
//! - **Producers** -- closures; retained when restoring onto the same
//!   `TickLoop`, re-registered by the caller otherwise.
//! - **Diagnostics and last report** -- transient, overwritten next tick.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use tessera_core::model::Model;
use tessera_core::state::State;

use crate::tick::TickLoop;

// ---------------------------------------------------------------------------
// SnapshotError
// ---------------------------------------------------------------------------

/// Errors produced while capturing or restoring snapshots.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The state could not be encoded to canonical JSON.
    #[error("failed to serialize state for hashing: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The recorded hash does not match the snapshot contents.
    #[error("snapshot hash mismatch: recorded {recorded} but recomputed {recomputed}")]
    HashMismatch { recorded: String, recomputed: String },

    /// The snapshot carries a zero step, which no tick loop accepts.
    #[error("snapshot has zero fixed_dt")]
    ZeroStep,
}

// ---------------------------------------------------------------------------
// EngineSnapshot
// ---------------------------------------------------------------------------

/// A serializable snapshot of the full simulation state.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct EngineSnapshot<M: Model> {
    /// Complete state: entities, clock, id counter, seed, pending effects.
    pub state: State<M>,
    /// Number of ticks executed at the time of capture.
    pub tick_counter: u64,
    /// Simulated time per tick.
    pub fixed_dt: Duration,
    /// BLAKE3 hex digest (64 lowercase hex chars) of the serialized state,
    /// tick counter and step.
    pub hash: String,
}

impl<M: Model> EngineSnapshot<M> {
    /// Recompute the hash from the snapshot contents and compare.
    pub fn verify(&self) -> Result<(), SnapshotError> {
        let recomputed = compute_hash(&self.state, self.tick_counter, self.fixed_dt)?;
        if recomputed != self.hash {
            warn!(
                recorded = %self.hash,
                recomputed = %recomputed,
                "snapshot failed integrity check"
            );
            return Err(SnapshotError::HashMismatch {
                recorded: self.hash.clone(),
                recomputed,
            });
        }
        Ok(())
    }
}

impl<M: Model> Clone for EngineSnapshot<M> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            tick_counter: self.tick_counter,
            fixed_dt: self.fixed_dt,
            hash: self.hash.clone(),
        }
    }
}

impl<M: Model> std::fmt::Debug for EngineSnapshot<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSnapshot")
            .field("tick_counter", &self.tick_counter)
            .field("fixed_dt", &self.fixed_dt)
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Hashing helpers
// ---------------------------------------------------------------------------

/// BLAKE3 hex digest over everything that affects how the simulation
/// continues. The hash field itself is not included.
fn compute_hash<M: Model>(
    state: &State<M>,
    tick_counter: u64,
    fixed_dt: Duration,
) -> Result<String, SnapshotError> {
    #[derive(Serialize)]
    #[serde(bound = "")]
    struct HashableState<'a, M: Model> {
        state: &'a State<M>,
        tick_counter: u64,
        fixed_dt: Duration,
    }

    let json_bytes = serde_json::to_vec(&HashableState {
        state,
        tick_counter,
        fixed_dt,
    })?;
    Ok(blake3::hash(&json_bytes).to_hex().to_string())
}

// ---------------------------------------------------------------------------
// TickLoop snapshot/restore methods
// ---------------------------------------------------------------------------

impl<M: Model> TickLoop<M> {
    /// Capture the state, tick counter and step, hashed.
    pub fn capture_snapshot(&self) -> Result<EngineSnapshot<M>, SnapshotError> {
        let hash = compute_hash(&self.state, self.tick_counter, self.config.fixed_dt)?;
        Ok(EngineSnapshot {
            state: self.state.clone(),
            tick_counter: self.tick_counter,
            fixed_dt: self.config.fixed_dt,
            hash,
        })
    }

    /// Restore from a snapshot after verifying its hash.
    ///
    /// On error the tick loop is left untouched. Registered producers are
    /// kept.
    pub fn restore_from_snapshot(&mut self, snapshot: &EngineSnapshot<M>) -> Result<(), SnapshotError> {
        if snapshot.fixed_dt.is_zero() {
            return Err(SnapshotError::ZeroStep);
        }
        snapshot.verify()?;

        self.state = snapshot.state.clone();
        self.tick_counter = snapshot.tick_counter;
        self.config.fixed_dt = snapshot.fixed_dt;
        Ok(())
    }

    /// BLAKE3 hex digest of the current state, tick counter and step.
    pub fn state_hash(&self) -> Result<String, SnapshotError> {
        compute_hash(&self.state, self.tick_counter, self.config.fixed_dt)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
