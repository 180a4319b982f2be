//! Tessera engine -- producer collection, deterministic tick loop, snapshots
//! and replay.
//!
//! This crate builds on [`tessera_core`] to provide the simulation driver:
//! a [`Collector`](collector::Collector) that runs every producer against
//! the frozen pre-tick state, and a fixed-timestep
//! [`TickLoop`](tick::TickLoop) that releases due delayed effects, folds
//! everything in one pass and advances the clock.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use tessera_engine::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Unit { life: u32, max: u32 }
//!
//! #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Arena { units: Store<Unit> }
//!
//! impl Entity<Arena> for Unit {
//!     fn store(world: &Arena) -> &Store<Self> { &world.units }
//!     fn store_mut(world: &mut Arena) -> &mut Store<Self> { &mut world.units }
//! }
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! enum Later { Cheer }
//!
//! struct Skirmish;
//!
//! impl Model for Skirmish {
//!     type World = Arena;
//!     type Delayed = Later;
//!     type Effect = &'static str;
//!     fn materialize(_: &Later) -> Change<Self> { Change::effect("cheer") }
//! }
//!
//! let mut state = State::<Skirmish>::new(Arena::default(), 7);
//! state.insert(Unit { life: 5, max: 10 });
//!
//! let config = TickConfig { fixed_dt: Duration::from_millis(100), ..Default::default() };
//! let mut tick_loop = TickLoop::new(state, config);
//! tick_loop.add_entity_producer::<Unit, _>("regen", |_, id, unit| {
//!     if unit.life < unit.max {
//!         Change::update::<Unit, _>(id, |_, u| Unit { life: u.life + 1, ..u.clone() })
//!     } else {
//!         Change::defer(Duration::from_millis(200), Later::Cheer)
//!     }
//! });
//!
//! let mut effects = Vec::new();
//! tick_loop.run_ticks_into(10, &mut effects);
//! assert_eq!(tick_loop.tick_count(), 10);
//! assert!(effects.contains(&"cheer"));
//! ```

#![deny(unsafe_code)]

pub mod collector;
pub mod replay;
pub mod sink;
pub mod snapshot;
pub mod tick;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the core crate for convenience.
pub use tessera_core;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    // Everything from the core prelude.
    pub use tessera_core::prelude::*;

    // Engine-specific exports.
    pub use crate::collector::{Collector, ProducerClass, ProducerFn};
    pub use crate::replay::{
        replay, Checkpoint, ReplayDivergence, ReplayLog, ReplayRecorder, ReplayResult,
    };
    pub use crate::sink::{EffectSink, TimedEffects};
    pub use crate::snapshot::{EngineSnapshot, SnapshotError};
    pub use crate::tick::{step, TickConfig, TickDiagnostics, TickLoop, TickOutcome};
}
