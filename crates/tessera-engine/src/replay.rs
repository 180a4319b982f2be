//! Deterministic replay with checkpoint verification.
//!
//! A tick depends on nothing but the state and the registered producers, so
//! a run is fully described by its starting snapshot and its length. The
//! [`ReplayRecorder`] keeps that snapshot plus periodic state hash
//! checkpoints; [`replay`] restores the snapshot onto a [`TickLoop`], runs
//! the same number of ticks and compares hashes at each checkpoint.
//!
//! A divergence means the producers registered on the replaying loop are
//! not the ones the log was recorded with, or that one of them reads
//! something outside the state.
//!
//! # Recording and replaying
//!
//! ```
//! use tessera_engine::prelude::*;
//!
//! #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Dice { total: u64 }
//!
//! struct Roll;
//!
//! impl Model for Roll {
//!     type World = Dice;
//!     type Delayed = ();
//!     type Effect = ();
//!     fn materialize(_: &()) -> Change<Self> { Change::Empty }
//! }
//!
//! fn roller() -> TickLoop<Roll> {
//!     let mut tick_loop = TickLoop::new(State::new(Dice::default(), 99), TickConfig::default());
//!     tick_loop.add_producer("roll", |_| {
//!         Change::random(|rng| {
//!             use rand::Rng;
//!             let face: u64 = rng.gen_range(1..=6);
//!             Change::<Roll>::transform(move |s| s.world_mut().total += face)
//!         })
//!     });
//!     tick_loop
//! }
//!
//! let mut tick_loop = roller();
//! let mut recorder = ReplayRecorder::new(tick_loop.capture_snapshot().unwrap(), 10);
//! for _ in 0..50 {
//!     recorder.record_tick(tick_loop.tick_count(), Some(tick_loop.state_hash().unwrap()));
//!     tick_loop.tick();
//! }
//! let log = recorder.finish();
//!
//! let result = replay(&mut roller(), &log).unwrap();
//! assert!(result.completed);
//! assert!(result.first_divergence.is_none());
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tessera_core::model::Model;

use crate::snapshot::EngineSnapshot;
use crate::tick::TickLoop;

// ---------------------------------------------------------------------------
// ReplayLog
// ---------------------------------------------------------------------------

/// A complete replay log: the starting snapshot, the run length and the
/// recorded checkpoints. Serializable to JSON for regression fixtures.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ReplayLog<M: Model> {
    /// Replay begins by restoring this snapshot.
    pub initial_snapshot: EngineSnapshot<M>,
    /// Number of ticks recorded. Replay executes exactly this many.
    pub total_ticks: u64,
    /// State hash checkpoints, in tick order.
    pub checkpoints: Vec<Checkpoint>,
}

impl<M: Model> Clone for ReplayLog<M> {
    fn clone(&self) -> Self {
        Self {
            initial_snapshot: self.initial_snapshot.clone(),
            total_ticks: self.total_ticks,
            checkpoints: self.checkpoints.clone(),
        }
    }
}

impl<M: Model> std::fmt::Debug for ReplayLog<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayLog")
            .field("initial_snapshot", &self.initial_snapshot)
            .field("total_ticks", &self.total_ticks)
            .field("checkpoints", &self.checkpoints.len())
            .finish()
    }
}

/// A state hash taken before the given tick was executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Tick number at which the hash was taken.
    pub tick: u64,
    /// BLAKE3 hex digest of the state at that tick.
    pub state_hash: String,
}

// ---------------------------------------------------------------------------
// ReplayResult
// ---------------------------------------------------------------------------

/// The outcome of replaying a [`ReplayLog`] against a [`TickLoop`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResult {
    /// Whether every recorded tick was replayed.
    pub completed: bool,
    /// Number of ticks executed before stopping.
    pub ticks_replayed: u64,
    /// The first checkpoint whose hash did not match. `None` when the run
    /// reproduced exactly.
    pub first_divergence: Option<ReplayDivergence>,
}

/// Where a replay stopped matching its recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayDivergence {
    /// Tick at which the mismatch was detected.
    pub tick: u64,
    /// Hash recorded in the log.
    pub expected_hash: String,
    /// Hash computed during replay.
    pub actual_hash: String,
}

// ---------------------------------------------------------------------------
// ReplayRecorder
// ---------------------------------------------------------------------------

/// Records a simulation run into a [`ReplayLog`].
///
/// Call [`record_tick`](Self::record_tick) before each tick, then
/// [`finish`](Self::finish). Tick numbers must be strictly increasing.
pub struct ReplayRecorder<M: Model> {
    log: ReplayLog<M>,
    /// Checkpoint every N ticks; 0 checkpoints every tick that supplies a hash.
    checkpoint_interval: u64,
    ticks_recorded: u64,
    last_tick: Option<u64>,
}

impl<M: Model> ReplayRecorder<M> {
    /// Start recording from `snapshot`.
    ///
    /// With `checkpoint_interval = 10`, hashes supplied at ticks 0, 10, 20
    /// and so on are kept.
    pub fn new(snapshot: EngineSnapshot<M>, checkpoint_interval: u64) -> Self {
        Self {
            log: ReplayLog {
                initial_snapshot: snapshot,
                total_ticks: 0,
                checkpoints: Vec::new(),
            },
            checkpoint_interval,
            ticks_recorded: 0,
            last_tick: None,
        }
    }

    /// Record one tick, before executing it.
    ///
    /// # Panics
    ///
    /// Panics if `tick` is not strictly greater than the previous one.
    pub fn record_tick(&mut self, tick: u64, state_hash: Option<String>) {
        if let Some(prev) = self.last_tick {
            assert!(
                tick > prev,
                "ReplayRecorder::record_tick: tick {tick} is not strictly greater than previous tick {prev}"
            );
        }
        self.last_tick = Some(tick);
        self.ticks_recorded += 1;

        let Some(state_hash) = state_hash else {
            return;
        };
        if self.checkpoint_interval == 0 || tick % self.checkpoint_interval == 0 {
            self.log.checkpoints.push(Checkpoint { tick, state_hash });
        }
    }

    /// Finish recording and return the log.
    pub fn finish(mut self) -> ReplayLog<M> {
        self.log.total_ticks = self.ticks_recorded;
        self.log
    }
}

// ---------------------------------------------------------------------------
// replay()
// ---------------------------------------------------------------------------

/// Replay `log` on `tick_loop`, verifying every checkpoint.
///
/// Producers must already be registered on `tick_loop`; its state is
/// overwritten by the log's initial snapshot. Replay stops at the first
/// divergence.
///
/// # Errors
///
/// Returns an error for a malformed log (duplicate checkpoint, tick range
/// overflow) or a snapshot that fails verification. Validation happens
/// before `tick_loop` is touched, so on error it is unmodified.
pub fn replay<M: Model>(tick_loop: &mut TickLoop<M>, log: &ReplayLog<M>) -> anyhow::Result<ReplayResult> {
    let mut checkpoints: BTreeMap<u64, &str> = BTreeMap::new();
    for checkpoint in &log.checkpoints {
        if checkpoints
            .insert(checkpoint.tick, checkpoint.state_hash.as_str())
            .is_some()
        {
            anyhow::bail!("replay log contains duplicate checkpoint at tick {}", checkpoint.tick);
        }
    }

    let start_tick = log.initial_snapshot.tick_counter;
    let total_ticks = log.total_ticks;
    let end_tick = start_tick.checked_add(total_ticks).ok_or_else(|| {
        anyhow::anyhow!(
            "tick range overflow: start_tick ({start_tick}) + total_ticks ({total_ticks}) exceeds u64::MAX"
        )
    })?;

    tick_loop
        .restore_from_snapshot(&log.initial_snapshot)
        .map_err(|e| anyhow::anyhow!("failed to restore initial snapshot for replay: {e}"))?;

    let mut ticks_replayed = 0;
    for tick in start_tick..end_tick {
        if let Some(&expected) = checkpoints.get(&tick) {
            let actual = tick_loop.state_hash()?;
            if actual != expected {
                warn!(tick, expected, actual = %actual, "replay diverged");
                return Ok(ReplayResult {
                    completed: false,
                    ticks_replayed,
                    first_divergence: Some(ReplayDivergence {
                        tick,
                        expected_hash: expected.to_owned(),
                        actual_hash: actual,
                    }),
                });
            }
        }
        tick_loop.tick();
        ticks_replayed += 1;
    }

    info!(
        ticks = ticks_replayed,
        checkpoints = checkpoints.len(),
        "replay reproduced recording"
    );
    Ok(ReplayResult {
        completed: true,
        ticks_replayed,
        first_divergence: None,
    })
}
